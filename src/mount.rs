//! `MountPlanner` (spec §4.4). No direct teacher analog — PBS has no
//! per-user home-mount planner — so this is written directly from the
//! spec, in the idiom of `pbs-config`'s plain free-function config modules.

use std::path::PathBuf;

use pdata_api_types::{MountTable, Role, Username, ROLE_ADMIN, ROLE_PROJECT, ROLE_USER};

/// Builds the per-session mount table for a `(user, roles)` pair, rooted
/// at a single db root directory.
pub struct MountPlanner {
    root: PathBuf,
}

impl MountPlanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        MountPlanner { root: root.into() }
    }

    /// Rules from spec §4.4. Any alias whose target directory does not
    /// exist is omitted; non-admin users never receive `~system`.
    pub fn plan(&self, username: &Username, roles: &[Role]) -> MountTable {
        let mut mounts = MountTable::new();
        let has = |name: &str| roles.iter().any(|r| r.as_str() == name);

        if has(ROLE_ADMIN) {
            self.mount_if_dir(&mut mounts, "~data", self.root.join("data"));
            self.mount_if_dir(&mut mounts, "~system", self.root.clone());
            self.mount_if_dir(&mut mounts, "~log", self.root.join("log"));
            self.mount_if_dir(&mut mounts, "~cache", self.root.join("cache"));
            self.mount_if_dir(&mut mounts, "~uploads", self.root.join("uploads"));
        }

        if has(ROLE_USER) {
            self.mount_if_dir(&mut mounts, "~data", self.root.join("data"));
            let alias = format!("~/data/users/{username}");
            self.mount_if_dir(&mut mounts, alias, self.root.join("data/users").join(username.as_str()));
        }

        if has(ROLE_PROJECT) {
            self.mount_if_dir(&mut mounts, "~data", self.root.join("data"));
            let alias = format!("~/data/projects/{username}");
            self.mount_if_dir(
                &mut mounts,
                alias,
                self.root.join("data/projects").join(username.as_str()),
            );
        }

        mounts
    }

    fn mount_if_dir(&self, mounts: &mut MountTable, alias: impl Into<String>, target: PathBuf) {
        if target.is_dir() {
            mounts.insert(alias, target);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::str::FromStr;
    use tempfile::TempDir;

    fn setup() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("data/users/alice")).unwrap();
        std::fs::create_dir_all(dir.path().join("data/projects/demo")).unwrap();
        std::fs::create_dir_all(dir.path().join("uploads")).unwrap();
        dir
    }

    #[test]
    fn user_role_gets_home_and_data_not_system() {
        let dir = setup();
        let planner = MountPlanner::new(dir.path());
        let alice = Username::from_str("alice").unwrap();
        let mounts = planner.plan(&alice, &[Role::from_str("user").unwrap()]);
        assert!(mounts.contains("~data"));
        assert!(mounts.contains("~/data/users/alice"));
        assert!(!mounts.contains("~system"));
    }

    #[test]
    fn admin_role_gets_system_and_uploads() {
        let dir = setup();
        let planner = MountPlanner::new(dir.path());
        let admin = Username::from_str("root").unwrap();
        let mounts = planner.plan(&admin, &[Role::from_str("admin").unwrap()]);
        assert!(mounts.contains("~system"));
        assert!(mounts.contains("~uploads"));
        assert!(mounts.contains("~data"));
    }

    #[test]
    fn missing_directory_is_omitted() {
        let dir = TempDir::new().unwrap();
        let planner = MountPlanner::new(dir.path());
        let bob = Username::from_str("bob").unwrap();
        let mounts = planner.plan(&bob, &[Role::from_str("user").unwrap()]);
        assert!(!mounts.contains("~data"));
        assert!(!mounts.contains("~/data/users/bob"));
    }

    #[test]
    fn project_role_does_not_leak_other_users_home() {
        let dir = setup();
        let planner = MountPlanner::new(dir.path());
        let carol = Username::from_str("carol").unwrap();
        let mounts = planner.plan(&carol, &[Role::from_str("project").unwrap()]);
        assert!(!mounts.contains("~/data/users/alice"));
    }
}
