//! Scenario 1 (spec §8): container creation, reopen, clear, password reset.

mod common;

#[cfg(test)]
mod tests {
    use vaultfs::{ClusterLevel, Container};

    fn scratch_path() -> (tempfile::TempDir, std::path::PathBuf) {
        crate::common::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("container.db");
        (dir, path)
    }

    #[test]
    fn create_yields_an_empty_root_folder() {
        let (_dir, path) = scratch_path();
        let container = Container::create(&path, "hunter2").unwrap();

        let root = container.get_root().unwrap();
        assert!(root.is_root());
        assert_eq!(root.path().unwrap(), "/");
        assert!(!root.has_children().unwrap());
        assert!(root.children().unwrap().is_empty());
    }

    #[test]
    fn create_refuses_an_existing_path() {
        let (_dir, path) = scratch_path();
        Container::create(&path, "hunter2").unwrap();
        let err = Container::create(&path, "hunter2").unwrap_err();
        assert!(matches!(err, vaultfs::ContainerError::CantCreate(_)));
    }

    #[test]
    fn reopen_recovers_the_namespace() {
        let (_dir, path) = scratch_path();
        {
            let container = Container::create(&path, "hunter2").unwrap();
            let root = container.get_root().unwrap();
            root.create_folder("docs", "").unwrap();
        }

        let container = Container::open(&path, "hunter2").unwrap();
        let root = container.get_root().unwrap();
        let docs = root.get_child("docs").unwrap();
        assert!(docs.is_some());
        assert_eq!(docs.unwrap().path().unwrap(), "/docs");
    }

    #[test]
    fn open_with_wrong_password_fails() {
        let (_dir, path) = scratch_path();
        Container::create(&path, "hunter2").unwrap();
        assert!(Container::open(&path, "wrong password").is_err());
    }

    #[test]
    fn reset_password_preserves_content() {
        let (_dir, path) = scratch_path();
        {
            let container = Container::create(&path, "old-pass").unwrap();
            let root = container.get_root().unwrap();
            let file = root.create_file("note.txt", "").unwrap();
            file.write(&mut &b"hello"[..], 5).unwrap();
            container.reset_password("new-pass").unwrap();
        }

        assert!(Container::open(&path, "old-pass").is_err());
        let container = Container::open(&path, "new-pass").unwrap();
        let file = container.get_root().unwrap().get_child("note.txt").unwrap().unwrap().as_file().unwrap();
        let mut buf = Vec::new();
        file.read(&mut buf, 5).unwrap();
        assert_eq!(buf, b"hello");
    }

    #[test]
    fn clear_wipes_namespace_and_payload_but_keeps_the_container_usable() {
        let (_dir, path) = scratch_path();
        let container = Container::create(&path, "hunter2").unwrap();
        let root = container.get_root().unwrap();
        let file = root.create_file("f", "").unwrap();
        file.write(&mut &b"data"[..], 4).unwrap();

        container.clear().unwrap();

        let root = container.get_root().unwrap();
        assert!(root.is_root());
        assert!(root.children().unwrap().is_empty());
        let new_file = root.create_file("f", "").unwrap();
        assert_eq!(new_file.size().unwrap(), 0);
    }

    #[test]
    fn create_with_level_persists_across_reopen() {
        let (_dir, path) = scratch_path();
        {
            let container = Container::create_with_level(&path, "hunter2", ClusterLevel::Small).unwrap();
            assert_eq!(container.get_data_usage_preferences().cluster_level(), ClusterLevel::Small);
        }
        let container = Container::open(&path, "hunter2").unwrap();
        assert_eq!(container.get_data_usage_preferences().cluster_level(), ClusterLevel::Small);
    }
}
