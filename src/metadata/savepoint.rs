use rusqlite::Connection;
use tracing::warn;

/// Per-connection savepoint name generator: `a, b, …, z, aa, ab, …`, the same
/// scheme a spreadsheet uses for column letters. Guarded by the connection's
/// own mutex (§4.1) so names never collide within one connection.
#[derive(Debug, Default)]
pub(crate) struct SavepointCounter(u64);

impl SavepointCounter {
    pub(crate) fn next_name(&mut self) -> String {
        let mut n = self.0;
        self.0 += 1;

        let mut letters = Vec::new();
        loop {
            letters.push((b'a' + (n % 26) as u8) as char);
            n = n / 26;
            if n == 0 {
                break;
            }
            n -= 1;
        }
        letters.iter().rev().collect()
    }
}

/// A scoped savepoint: acquired on construction, rolled back on [`Drop`]
/// unless [`Self::release`] was called. Rollback failures during drop are
/// logged and never raised, matching the teacher crate's destructor-safety
/// posture for its own resource guards.
pub(crate) struct SavepointGuard<'c> {
    conn: &'c Connection,
    name: String,
    released: bool,
}

impl<'c> SavepointGuard<'c> {
    pub(crate) fn begin(conn: &'c Connection, name: String) -> rusqlite::Result<Self> {
        conn.execute_batch(&format!("SAVEPOINT {name};"))?;
        Ok(Self { conn, name, released: false })
    }

    /// Releases (commits) the savepoint. Consumes `self` so it cannot be
    /// rolled back a second time by `Drop`.
    pub(crate) fn release(mut self) -> rusqlite::Result<()> {
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {};", self.name))?;
        self.released = true;
        Ok(())
    }

    /// Explicitly rolls back. Also callable implicitly via `Drop`.
    pub(crate) fn rollback(mut self) -> rusqlite::Result<()> {
        let result = self.conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {};", self.name));
        self.released = true;
        result
    }
}

impl Drop for SavepointGuard<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = self.conn.execute_batch(&format!("ROLLBACK TO SAVEPOINT {};", self.name)) {
            warn!(savepoint = %self.name, error = %err, "rollback during drop failed");
        }
    }
}
