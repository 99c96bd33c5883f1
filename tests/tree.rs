//! Scenario 2 (spec §8) plus the namespace invariants: child creation and
//! retrieval, move/rename policy, remove recursion, link target resolution.

mod common;

#[cfg(test)]
mod tests {
    use vaultfs::{Container, ContainerError, ElementType};

    fn scratch_container() -> (tempfile::TempDir, Container) {
        crate::common::init_tracing();
        let dir = tempfile::tempdir().unwrap();
        let container = Container::create(dir.path().join("container.db"), "hunter2").unwrap();
        (dir, container)
    }

    #[test]
    fn create_child_then_get_child_is_the_same_element() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();

        let created = root.create_folder("projects", "tag-a").unwrap();
        let fetched = root.get_child("projects").unwrap().unwrap();

        assert_eq!(created.id(), fetched.id());
        assert_eq!(fetched.path().unwrap(), "/projects");
        assert_eq!(fetched.element_type(), ElementType::Folder);
    }

    #[test]
    fn duplicate_name_in_same_folder_is_rejected() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        root.create_file("a.txt", "").unwrap();
        let err = root.create_file("a.txt", "").unwrap_err();
        assert!(matches!(err, ContainerError::AlreadyExists));
    }

    #[test]
    fn invalid_names_are_rejected() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        assert!(root.create_file("", "").is_err());
        assert!(root.create_file("a/b", "").is_err());
    }

    #[test]
    fn is_child_of_terminates_at_the_root() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let a = root.create_folder("a", "").unwrap();
        let b = a.create_folder("b", "").unwrap();
        let c = b.create_folder("c", "").unwrap();

        let root_elem = container.resolve("/").unwrap().unwrap();
        let c_elem = container.resolve("/a/b/c").unwrap().unwrap();
        assert!(c_elem.is_child_of(&root_elem).unwrap());
        assert!(!root_elem.is_child_of(&c_elem).unwrap());
        assert_eq!(c.path().unwrap(), "/a/b/c");
    }

    #[test]
    fn root_has_no_parent_and_cannot_be_moved_or_removed() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let other = root.create_folder("other", "").unwrap();

        let root_elem = container.resolve("/").unwrap().unwrap();
        assert!(matches!(root_elem.get_parent_entry().unwrap_err(), ContainerError::ActionIsForbidden(_)));
        assert!(matches!(root_elem.remove().unwrap_err(), ContainerError::ActionIsForbidden(_)));
        assert!(matches!(root_elem.move_to_entry(&other).unwrap_err(), ContainerError::ActionIsForbidden(_)));
    }

    #[test]
    fn move_into_self_and_into_own_descendant_are_forbidden() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let a = root.create_folder("a", "").unwrap();
        let b = a.create_folder("b", "").unwrap();

        let a_elem = container.resolve("/a").unwrap().unwrap();
        assert!(matches!(a_elem.move_to_entry(&a).unwrap_err(), ContainerError::ActionIsForbidden(_)));
        assert!(matches!(a_elem.move_to_entry(&b).unwrap_err(), ContainerError::ActionIsForbidden(_)));
    }

    #[test]
    fn move_to_same_parent_is_forbidden() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        root.create_folder("a", "").unwrap();
        let a_elem = container.resolve("/a").unwrap().unwrap();
        assert!(matches!(a_elem.move_to_entry(&root).unwrap_err(), ContainerError::ActionIsForbidden(_)));
    }

    #[test]
    fn move_to_folder_with_name_collision_is_rejected() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let dst = root.create_folder("dst", "").unwrap();
        dst.create_file("same.txt", "").unwrap();
        root.create_file("same.txt", "").unwrap();

        let src_elem = container.resolve("/same.txt").unwrap().unwrap();
        assert!(matches!(src_elem.move_to_entry(&dst).unwrap_err(), ContainerError::AlreadyExists));
    }

    #[test]
    fn move_relocates_and_updates_path() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let dst = root.create_folder("dst", "").unwrap();
        root.create_file("note.txt", "").unwrap();

        let note = container.resolve("/note.txt").unwrap().unwrap();
        note.move_to_entry(&dst).unwrap();
        assert_eq!(note.path().unwrap(), "/dst/note.txt");
        assert!(container.resolve("/note.txt").unwrap().is_none());
    }

    #[test]
    fn rename_updates_path_and_rejects_collisions() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let a = root.create_folder("a", "").unwrap();
        root.create_folder("b", "").unwrap();

        a.rename("renamed").unwrap();
        assert_eq!(a.path().unwrap(), "/renamed");

        let renamed = container.resolve("/renamed").unwrap().unwrap();
        assert!(matches!(renamed.rename("b").unwrap_err(), ContainerError::AlreadyExists));
    }

    #[test]
    fn remove_recurses_into_folders_and_frees_file_streams() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let a = root.create_folder("a", "").unwrap();
        let f = a.create_file("big.bin", "").unwrap();
        f.write(&mut &vec![7u8; 4096][..], 4096).unwrap();

        let a_elem = container.resolve("/a").unwrap().unwrap();
        a_elem.remove().unwrap();

        assert!(container.resolve("/a").unwrap().is_none());
        assert!(!a.exists());
    }

    #[test]
    fn reset_properties_is_idempotent_and_updates_tag() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let f = root.create_file("f", "v1").unwrap();

        let before = f.get_properties().unwrap();
        assert_eq!(before.tag(), "v1");

        f.reset_properties("v2").unwrap();
        let after_first = f.get_properties().unwrap();
        assert_eq!(after_first.tag(), "v2");

        f.reset_properties("v2").unwrap();
        let after_second = f.get_properties().unwrap();
        assert_eq!(after_second.tag(), "v2");
        assert_eq!(after_first.created(), after_second.created());
    }

    #[test]
    fn sym_link_resolves_to_its_target_and_reports_none_when_missing() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        root.create_folder("docs", "").unwrap();

        let link = root.create_sym_link("link", "", "/docs").unwrap();
        let target = link.target().unwrap();
        assert!(target.is_some());
        assert_eq!(target.unwrap().path().unwrap(), "/docs");

        container.resolve("/docs").unwrap().unwrap().remove().unwrap();
        assert!(link.target().unwrap().is_none());
    }

    #[test]
    fn sym_link_target_must_be_absolute() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        assert!(root.create_sym_link("link", "", "relative/path").is_err());
    }

    #[test]
    fn direct_link_resolves_by_id_and_reports_none_when_target_removed() {
        let (_dir, container) = scratch_container();
        let root = container.get_root().unwrap();
        let target = root.create_file("target.bin", "").unwrap();
        let target_elem = container.resolve("/target.bin").unwrap().unwrap();

        let link = root.create_direct_link("hardlink", "", &target_elem).unwrap();
        let resolved = link.target().unwrap().unwrap();
        assert_eq!(resolved.id(), target.id());

        target_elem.remove().unwrap();
        assert!(link.target().unwrap().is_none());
    }
}
