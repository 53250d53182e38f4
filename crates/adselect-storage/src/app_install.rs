//! Repository for app-install permissions.
//!
//! Each row grants one buyer ad tech the right to file app-install filters
//! for one package. Setting a package's permissions replaces the whole set.

use std::sync::Arc;

use adselect_core::error::{AdSelectError, Result};

use crate::db::{map_sqlite_err, Database};

pub struct AppInstallRepository {
    db: Arc<Database>,
}

impl AppInstallRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Replace the set of buyers permitted for a package.
    pub fn set_permissions(&self, package_name: &str, buyers: &[String]) -> Result<()> {
        self.db.with_tx(|tx| {
            tx.execute(
                "DELETE FROM app_install_permissions WHERE package_name = ?1",
                rusqlite::params![package_name],
            )
            .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            for buyer in buyers {
                tx.execute(
                    "INSERT OR REPLACE INTO app_install_permissions (package_name, buyer)
                     VALUES (?1, ?2)",
                    rusqlite::params![package_name, buyer],
                )
                .map_err(map_sqlite_err)?;
            }
            Ok(())
        })
    }

    /// Whether the buyer may file app-install filters for the package.
    pub fn can_buyer_file_install(&self, buyer: &str, package_name: &str) -> Result<bool> {
        self.db.with_conn(|conn| {
            let exists: bool = conn
                .query_row(
                    "SELECT EXISTS(SELECT 1 FROM app_install_permissions
                     WHERE buyer = ?1 AND package_name = ?2 LIMIT 1)",
                    rusqlite::params![buyer, package_name],
                    |row| row.get(0),
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(exists)
        })
    }

    pub fn remove_for_package(&self, package_name: &str) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute(
                    "DELETE FROM app_install_permissions WHERE package_name = ?1",
                    rusqlite::params![package_name],
                )
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }

    pub fn delete_all(&self) -> Result<usize> {
        self.db.with_conn(|conn| {
            let removed = conn
                .execute("DELETE FROM app_install_permissions", [])
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKAGE: &str = "com.example.caller";

    fn make_db() -> Arc<Database> {
        Arc::new(Database::in_memory().unwrap())
    }

    #[test]
    fn test_set_and_check_permissions() {
        let repo = AppInstallRepository::new(make_db());
        repo.set_permissions(
            PACKAGE,
            &["buyer-a.example.com".to_string(), "buyer-b.example.com".to_string()],
        )
        .unwrap();

        assert!(repo.can_buyer_file_install("buyer-a.example.com", PACKAGE).unwrap());
        assert!(repo.can_buyer_file_install("buyer-b.example.com", PACKAGE).unwrap());
        assert!(!repo.can_buyer_file_install("buyer-c.example.com", PACKAGE).unwrap());
        assert!(!repo
            .can_buyer_file_install("buyer-a.example.com", "com.other.app")
            .unwrap());
    }

    #[test]
    fn test_set_permissions_replaces_previous_set() {
        let repo = AppInstallRepository::new(make_db());
        repo.set_permissions(PACKAGE, &["buyer-a.example.com".to_string()]).unwrap();
        repo.set_permissions(PACKAGE, &["buyer-b.example.com".to_string()]).unwrap();

        assert!(!repo.can_buyer_file_install("buyer-a.example.com", PACKAGE).unwrap());
        assert!(repo.can_buyer_file_install("buyer-b.example.com", PACKAGE).unwrap());
    }

    #[test]
    fn test_remove_for_package() {
        let repo = AppInstallRepository::new(make_db());
        repo.set_permissions(PACKAGE, &["buyer-a.example.com".to_string()]).unwrap();
        repo.set_permissions("com.other.app", &["buyer-a.example.com".to_string()])
            .unwrap();

        assert_eq!(repo.remove_for_package(PACKAGE).unwrap(), 1);
        assert!(!repo.can_buyer_file_install("buyer-a.example.com", PACKAGE).unwrap());
        assert!(repo
            .can_buyer_file_install("buyer-a.example.com", "com.other.app")
            .unwrap());
    }

    #[test]
    fn test_delete_all() {
        let repo = AppInstallRepository::new(make_db());
        repo.set_permissions(PACKAGE, &["buyer-a.example.com".to_string()]).unwrap();
        assert_eq!(repo.delete_all().unwrap(), 1);
    }
}
