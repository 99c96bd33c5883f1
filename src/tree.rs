use crate::error::{ContainerError, Result};
use crate::io_engine::{self, SpaceUsageInfo};
use crate::metadata::{ElementRow, ElementType};
use crate::observer::{NullObserver, ProgressObserver};
use crate::resources::{ContainerInner, Resources};
use crate::time::now;
use std::io::{Read, Write};

const SEPARATOR: char = '/';

/// Rejects the empty name, any name containing the separator, and (as a
/// consequence of the separator check) the separator alone (§4.3).
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains(SEPARATOR) {
        return Err(ContainerError::WrongParameters(format!("invalid element name {name:?}")));
    }
    Ok(())
}

/// A SymLink target must be an absolute path whose components are each
/// individually valid names (invariant 10); it need not resolve.
fn validate_sym_link_target(path: &str) -> Result<()> {
    if !path.starts_with(SEPARATOR) {
        return Err(ContainerError::WrongParameters(format!(
            "symlink target must be an absolute path: {path:?}"
        )));
    }
    for component in path.split(SEPARATOR).filter(|c| !c.is_empty()) {
        validate_name(component)?;
    }
    Ok(())
}

/// Applies the propagation policy (§7): low-level read/write failures get an
/// outer context code, but an observer-driven abort is already the terminal
/// error the caller should see and passes through unwrapped.
fn wrap_unless_aborted(err: ContainerError, wrap: fn(ContainerError) -> ContainerError) -> ContainerError {
    match err {
        aborted @ ContainerError::Aborted { .. } => aborted,
        other => wrap(other),
    }
}

fn is_descendant(inner: &ContainerInner, candidate_id: i64, ancestor_id: i64) -> Result<bool> {
    let mut current = candidate_id;
    loop {
        if current == ancestor_id {
            return Ok(true);
        }
        let row = inner.metadata.get_element(current)?;
        if row.parent_id == 0 {
            return Ok(false);
        }
        current = row.parent_id;
    }
}

/// Splits on the separator and walks from the root, binding `(parent_id,
/// name)` at each step (§4.3). `Ok(None)` means the path doesn't resolve;
/// `IsDamaged` surfaces if a step finds more than one matching row.
pub(crate) fn resolve_path(inner: &ContainerInner, resources: &Resources, path: &str) -> Result<Option<Element>> {
    if !path.starts_with(SEPARATOR) {
        return Err(ContainerError::WrongParameters(format!("path must be absolute: {path:?}")));
    }

    let mut current_id = 1i64;
    for component in path.split(SEPARATOR).filter(|c| !c.is_empty()) {
        validate_name(component)?;
        match inner.metadata.find_child(current_id, component)? {
            Some(row) => current_id = row.id,
            None => return Ok(None),
        }
    }

    let row = inner.metadata.get_element(current_id)?;
    Ok(Some(Element::from_row(row, resources.clone())))
}

/// Timestamps and free-form tag shared by every element, returned by
/// `GetProperties` (§4.3).
#[derive(Debug, Clone)]
pub struct Properties {
    created: i64,
    modified: i64,
    tag: String,
}

impl Properties {
    pub fn created(&self) -> i64 {
        self.created
    }

    pub fn modified(&self) -> i64 {
        self.modified
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }
}

/// The shared header every namespace member carries (§9): an id and a weak
/// handle back to the owning container's resources.
struct ElementHandle {
    id: i64,
    element_type: ElementType,
    resources: Resources,
}

impl ElementHandle {
    fn row(&self, inner: &ContainerInner) -> Result<ElementRow> {
        inner.metadata.get_element(self.id)
    }

    fn name(&self) -> Result<String> {
        let inner = self.resources.upgrade()?;
        Ok(self.row(&inner)?.name)
    }

    fn path(&self) -> Result<String> {
        let inner = self.resources.upgrade()?;
        path_of(&inner, self.id)
    }

    fn exists(&self) -> bool {
        match self.resources.upgrade() {
            Ok(inner) => self.row(&inner).is_ok(),
            Err(_) => false,
        }
    }

    fn is_child_of(&self, ancestor_id: i64) -> Result<bool> {
        let inner = self.resources.upgrade()?;
        is_descendant(&inner, self.id, ancestor_id)
    }

    fn parent_entry(&self) -> Result<Element> {
        if self.id == 1 {
            return Err(ContainerError::ActionIsForbidden("root has no parent".into()));
        }
        let inner = self.resources.upgrade()?;
        let row = self.row(&inner)?;
        let parent_row = inner.metadata.get_element(row.parent_id)?;
        Ok(Element::from_row(parent_row, self.resources.clone()))
    }

    fn move_to(&self, new_parent_id: i64) -> Result<()> {
        if self.id == 1 {
            return Err(ContainerError::ActionIsForbidden("cannot move the root".into()));
        }
        if new_parent_id == self.id {
            return Err(ContainerError::ActionIsForbidden("cannot move an element into itself".into()));
        }
        let inner = self.resources.upgrade()?;
        let row = self.row(&inner)?;
        if row.parent_id == new_parent_id {
            return Err(ContainerError::ActionIsForbidden(
                "element is already a child of this parent".into(),
            ));
        }
        if is_descendant(&inner, new_parent_id, self.id)? {
            return Err(ContainerError::ActionIsForbidden(
                "cannot move an element into its own descendant".into(),
            ));
        }
        if inner.metadata.find_child(new_parent_id, &row.name)?.is_some() {
            return Err(ContainerError::AlreadyExists);
        }
        inner.metadata.update_parent(self.id, new_parent_id)?;
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        if self.id == 1 {
            return Err(ContainerError::ActionIsForbidden("cannot remove the root".into()));
        }
        let inner = self.resources.upgrade()?;
        remove_recursive(&inner, self.id, &self.resources)
    }

    fn rename(&self, new_name: &str) -> Result<()> {
        if self.id == 1 {
            return Err(ContainerError::ActionIsForbidden("cannot rename the root".into()));
        }
        validate_name(new_name)?;
        let inner = self.resources.upgrade()?;
        let row = self.row(&inner)?;
        if inner.metadata.find_child(row.parent_id, new_name)?.is_some() {
            return Err(ContainerError::AlreadyExists);
        }
        inner.metadata.update_name(self.id, new_name)?;
        Ok(())
    }

    fn properties(&self) -> Result<Properties> {
        let inner = self.resources.upgrade()?;
        let row = self.row(&inner)?;
        Ok(Properties { created: row.created, modified: row.modified, tag: row.meta })
    }

    fn reset_properties(&self, tag: &str) -> Result<()> {
        let inner = self.resources.upgrade()?;
        inner.metadata.update_meta(self.id, tag, now())?;
        Ok(())
    }
}

fn path_of(inner: &ContainerInner, id: i64) -> Result<String> {
    if id == 1 {
        return Ok(SEPARATOR.to_string());
    }
    let row = inner.metadata.get_element(id)?;
    if row.parent_id == 1 {
        Ok(format!("{SEPARATOR}{}", row.name))
    } else {
        Ok(format!("{}{SEPARATOR}{}", path_of(inner, row.parent_id)?, row.name))
    }
}

/// §4.3 remove policy: recursing into a Folder's children before deleting
/// its own row; a File's streams are freed (`used = 0`) but kept in
/// `FileStreams` — with no surviving `FileSystem` row to claim them they are
/// truly unowned and immediately eligible for adoption (§4.4).
fn remove_recursive(inner: &ContainerInner, id: i64, resources: &Resources) -> Result<()> {
    let row = inner.metadata.get_element(id)?;
    match row.element_type {
        ElementType::Folder => {
            for child in inner.metadata.children(id)? {
                remove_recursive(inner, child.id, resources)?;
            }
        }
        ElementType::File => {
            for stream in inner.metadata.streams_for_file(id)? {
                inner.metadata.free_stream(stream.id)?;
            }
        }
        ElementType::SymLink | ElementType::DirectLink => {}
    }
    inner.metadata.delete_element(id)?;
    Ok(())
}

/// Tagged-variant namespace member (§9): Folder, File, SymLink, or
/// DirectLink, sharing the same id/parent/name/timestamps/meta header.
pub enum Element {
    Folder(Folder),
    File(File),
    SymLink(SymLink),
    DirectLink(DirectLink),
}

impl Element {
    pub(crate) fn from_row(row: ElementRow, resources: Resources) -> Element {
        let handle = ElementHandle { id: row.id, element_type: row.element_type, resources };
        match row.element_type {
            ElementType::Folder => Element::Folder(Folder(handle)),
            ElementType::File => Element::File(File(handle)),
            ElementType::SymLink => Element::SymLink(SymLink(handle)),
            ElementType::DirectLink => Element::DirectLink(DirectLink(handle)),
        }
    }

    fn handle(&self) -> &ElementHandle {
        match self {
            Element::Folder(f) => f.handle(),
            Element::File(f) => f.handle(),
            Element::SymLink(s) => s.handle(),
            Element::DirectLink(d) => d.handle(),
        }
    }

    pub fn as_folder(self) -> Option<Folder> {
        match self {
            Element::Folder(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_file(self) -> Option<File> {
        match self {
            Element::File(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_sym_link(self) -> Option<SymLink> {
        match self {
            Element::SymLink(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_direct_link(self) -> Option<DirectLink> {
        match self {
            Element::DirectLink(d) => Some(d),
            _ => None,
        }
    }
}

pub struct Folder(ElementHandle);
pub struct File(ElementHandle);
pub struct SymLink(ElementHandle);
pub struct DirectLink(ElementHandle);

impl Folder {
    fn handle(&self) -> &ElementHandle {
        &self.0
    }
}
impl File {
    fn handle(&self) -> &ElementHandle {
        &self.0
    }
}
impl SymLink {
    fn handle(&self) -> &ElementHandle {
        &self.0
    }
}
impl DirectLink {
    fn handle(&self) -> &ElementHandle {
        &self.0
    }
}

/// Generates the operations shared by every element variant (§4.3) across
/// `Element` and its four leaf types alike, rather than repeating the same
/// five bodies by hand.
macro_rules! impl_element_common {
    ($($t:ty),+ $(,)?) => {
        $(
            impl $t {
                pub fn id(&self) -> i64 {
                    self.handle().id
                }

                pub fn element_type(&self) -> ElementType {
                    self.handle().element_type
                }

                pub fn name(&self) -> Result<String> {
                    self.handle().name()
                }

                pub fn path(&self) -> Result<String> {
                    self.handle().path()
                }

                pub fn exists(&self) -> bool {
                    self.handle().exists()
                }

                pub fn is_the_same(&self, other: &Element) -> bool {
                    self.id() == other.id()
                }

                pub fn is_child_of(&self, maybe_ancestor: &Element) -> Result<bool> {
                    self.handle().is_child_of(maybe_ancestor.id())
                }

                pub fn get_parent_entry(&self) -> Result<Element> {
                    self.handle().parent_entry()
                }

                pub fn move_to_entry(&self, new_parent: &Folder) -> Result<()> {
                    self.handle().move_to(new_parent.id())
                }

                pub fn remove(&self) -> Result<()> {
                    self.handle().remove()
                }

                pub fn rename(&self, new_name: &str) -> Result<()> {
                    self.handle().rename(new_name)
                }

                pub fn get_properties(&self) -> Result<Properties> {
                    self.handle().properties()
                }

                pub fn reset_properties(&self, tag: &str) -> Result<()> {
                    self.handle().reset_properties(tag)
                }
            }
        )+
    };
}

impl_element_common!(Element, Folder, File, SymLink, DirectLink);

impl Folder {
    pub fn is_root(&self) -> bool {
        self.0.id == 1
    }

    pub fn create_folder(&self, name: &str, meta: &str) -> Result<Folder> {
        self.create_child(name, ElementType::Folder, meta, "")
            .map(|e| e.as_folder().expect("just created as Folder"))
    }

    pub fn create_file(&self, name: &str, meta: &str) -> Result<File> {
        self.create_child(name, ElementType::File, meta, "")
            .map(|e| e.as_file().expect("just created as File"))
    }

    pub fn create_sym_link(&self, name: &str, meta: &str, target_path: &str) -> Result<SymLink> {
        validate_sym_link_target(target_path)?;
        self.create_child(name, ElementType::SymLink, meta, target_path)
            .map(|e| e.as_sym_link().expect("just created as SymLink"))
    }

    pub fn create_direct_link(&self, name: &str, meta: &str, target: &Element) -> Result<DirectLink> {
        self.create_child(name, ElementType::DirectLink, meta, &target.id().to_string())
            .map(|e| e.as_direct_link().expect("just created as DirectLink"))
    }

    fn create_child(&self, name: &str, element_type: ElementType, meta: &str, specific_data: &str) -> Result<Element> {
        validate_name(name)?;
        let inner = self.0.resources.upgrade()?;
        if inner.metadata.find_child(self.0.id, name)?.is_some() {
            return Err(ContainerError::AlreadyExists);
        }
        let id = inner.metadata.insert_element(self.0.id, name, element_type, now(), meta, specific_data)?;
        let row = inner.metadata.get_element(id)?;
        Ok(Element::from_row(row, self.0.resources.clone()))
    }

    pub fn get_child(&self, name: &str) -> Result<Option<Element>> {
        let inner = self.0.resources.upgrade()?;
        Ok(inner
            .metadata
            .find_child(self.0.id, name)?
            .map(|row| Element::from_row(row, self.0.resources.clone())))
    }

    /// Ordered iteration of this folder's children (§4.3's `Iterator`).
    pub fn children(&self) -> Result<Vec<Element>> {
        let inner = self.0.resources.upgrade()?;
        Ok(inner
            .metadata
            .children(self.0.id)?
            .into_iter()
            .map(|row| Element::from_row(row, self.0.resources.clone()))
            .collect())
    }

    pub fn has_children(&self) -> Result<bool> {
        let inner = self.0.resources.upgrade()?;
        inner.metadata.has_children(self.0.id)
    }
}

impl File {
    pub fn size(&self) -> Result<u64> {
        let inner = self.0.resources.upgrade()?;
        io_engine::size(&inner.metadata, self.0.id)
    }

    pub fn get_space_usage_info(&self) -> Result<SpaceUsageInfo> {
        let inner = self.0.resources.upgrade()?;
        io_engine::space_usage(&inner.metadata, self.0.id)
    }

    pub fn read(&self, dst: &mut impl Write, nbytes: u64) -> Result<u64> {
        self.read_with_observer(dst, nbytes, &mut NullObserver)
    }

    pub fn read_with_observer(
        &self,
        dst: &mut impl Write,
        nbytes: u64,
        observer: &mut dyn ProgressObserver,
    ) -> Result<u64> {
        let inner = self.0.resources.upgrade()?;
        let cluster_size = inner.preferences.lock().unwrap().cluster_size();
        io_engine::read(&inner.metadata, &inner.payload, self.0.id, dst, nbytes, cluster_size, observer)
            .map_err(|err| wrap_unless_aborted(err, ContainerError::wrap_read))
    }

    pub fn write(&self, src: &mut impl Read, nbytes: u64) -> Result<u64> {
        self.write_with_observer(src, nbytes, &mut NullObserver)
    }

    pub fn write_with_observer(
        &self,
        src: &mut impl Read,
        nbytes: u64,
        observer: &mut dyn ProgressObserver,
    ) -> Result<u64> {
        let inner = self.0.resources.upgrade()?;
        let preferences = *inner.preferences.lock().unwrap();
        let written = io_engine::write(&inner.metadata, &inner.payload, self.0.id, src, nbytes, preferences, observer)
            .map_err(|err| wrap_unless_aborted(err, ContainerError::wrap_write))?;
        inner.metadata.touch_modified(self.0.id, now())?;
        Ok(written)
    }

    pub fn clear(&self) -> Result<()> {
        let inner = self.0.resources.upgrade()?;
        io_engine::clear(&inner.metadata, self.0.id)?;
        inner.metadata.touch_modified(self.0.id, now())?;
        Ok(())
    }
}

impl SymLink {
    /// The raw target path as stored, without attempting resolution.
    pub fn target_path(&self) -> Result<String> {
        let inner = self.0.resources.upgrade()?;
        Ok(self.0.row(&inner)?.specific_data)
    }

    /// Resolves the stored path through the namespace tree (invariant 10).
    /// `Ok(None)` if the target doesn't currently exist.
    pub fn target(&self) -> Result<Option<Element>> {
        let inner = self.0.resources.upgrade()?;
        let target_path = self.0.row(&inner)?.specific_data;
        if target_path.is_empty() {
            return Ok(None);
        }
        resolve_path(&inner, &self.0.resources, &target_path)
    }
}

impl DirectLink {
    /// Resolves the stored target id (invariant 9). `Ok(None)` if the
    /// target Element no longer exists — an orphaned target is reported
    /// through the return value, not as a container failure.
    pub fn target(&self) -> Result<Option<Element>> {
        let inner = self.0.resources.upgrade()?;
        let specific_data = self.0.row(&inner)?.specific_data;
        if specific_data.is_empty() {
            return Ok(None);
        }
        let target_id: i64 = specific_data.parse().map_err(|_| ContainerError::IsDamaged)?;
        match inner.metadata.get_element(target_id) {
            Ok(row) => Ok(Some(Element::from_row(row, self.0.resources.clone()))),
            Err(ContainerError::NotFound) => Ok(None),
            Err(err) => Err(err),
        }
    }
}
