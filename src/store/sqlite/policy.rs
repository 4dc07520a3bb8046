use rusqlite::{OptionalExtension, Transaction, params};

use super::SqliteStore;
use crate::error::{Error, Result};
use crate::store::{PolicyStore, PolicyTx};
use crate::types::{CustomPrivilege, Role, RoleBinding};

/// Policy operations bound to an open transaction. Every operation runs
/// under its own savepoint so a failed grant leaves earlier ones intact.
struct SqlitePolicyTx<'a> {
    tx: &'a Transaction<'a>,
}

impl SqlitePolicyTx<'_> {
    fn scoped(&self, op: impl FnOnce(&Transaction<'_>) -> Result<()>) -> Result<()> {
        self.tx.execute_batch("SAVEPOINT policy_op")?;
        match op(self.tx) {
            Ok(()) => {
                self.tx.execute_batch("RELEASE policy_op")?;
                Ok(())
            }
            Err(e) => {
                self.tx
                    .execute_batch("ROLLBACK TO policy_op; RELEASE policy_op")?;
                Err(e)
            }
        }
    }
}

fn exists(tx: &Transaction<'_>, sql: &str, id: i64) -> Result<bool> {
    Ok(tx
        .query_row(sql, params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

impl PolicyTx for SqlitePolicyTx<'_> {
    fn grant(&self, binding: &RoleBinding) -> Result<()> {
        self.scoped(|tx| {
            if !exists(tx, "SELECT 1 FROM users WHERE id = ?1", binding.user_id)? {
                return Err(Error::UserNotFound(binding.user_id.to_string()));
            }
            if !exists(
                tx,
                "SELECT 1 FROM organizations WHERE id = ?1",
                binding.organization_id,
            )? {
                return Err(Error::TenantOrganizationNotExists(binding.organization_id));
            }

            tx.execute(
                "INSERT OR IGNORE INTO role_bindings (user_id, tenant_id, organization_id, role)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    binding.user_id,
                    binding.tenant_id,
                    binding.organization_id,
                    binding.role.as_str()
                ],
            )?;
            Ok(())
        })
    }

    fn revoke(&self, binding: &RoleBinding, cascade_teams: bool) -> Result<()> {
        self.scoped(|tx| {
            tx.execute(
                "DELETE FROM role_bindings
                 WHERE user_id = ?1 AND tenant_id = ?2 AND organization_id = ?3 AND role = ?4",
                params![
                    binding.user_id,
                    binding.tenant_id,
                    binding.organization_id,
                    binding.role.as_str()
                ],
            )?;

            if cascade_teams {
                tx.execute(
                    "DELETE FROM team_users WHERE user_id = ?1 AND organization_id = ?2",
                    params![binding.user_id, binding.organization_id],
                )?;
            }
            Ok(())
        })
    }
}

impl PolicyStore for SqliteStore {
    fn roles_for(&self, user_id: i64, tenant_id: &str, org_id: i64) -> Result<Vec<Role>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT role FROM role_bindings
             WHERE user_id = ?1 AND tenant_id = ?2 AND organization_id = ?3",
        )?;
        let names = stmt
            .query_map(params![user_id, tenant_id, org_id], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut roles = Vec::with_capacity(names.len());
        for name in names {
            match Role::parse(&name) {
                Some(role) => roles.push(role),
                None => tracing::warn!("Ignoring unknown role '{}' for user {}", name, user_id),
            }
        }
        roles.sort();
        Ok(roles)
    }

    fn list_org_bindings(&self, org_id: i64) -> Result<Vec<RoleBinding>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT user_id, tenant_id, organization_id, role FROM role_bindings
             WHERE organization_id = ?1 ORDER BY user_id",
        )?;
        let rows = stmt.query_map(params![org_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut bindings = Vec::new();
        for row in rows {
            let (user_id, tenant_id, organization_id, role) = row?;
            if let Some(role) = Role::parse(&role) {
                bindings.push(RoleBinding {
                    user_id,
                    tenant_id,
                    organization_id,
                    role,
                });
            }
        }
        Ok(bindings)
    }

    fn count_org_bindings(&self, org_id: i64) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM role_bindings WHERE organization_id = ?1",
            params![org_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// The store lock is held for the whole closure; `f` must not call back
    /// into this store.
    fn transaction(&self, f: &mut dyn FnMut(&dyn PolicyTx) -> Result<()>) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        f(&SqlitePolicyTx { tx: &tx })?;
        tx.commit()?;
        Ok(())
    }

    fn add_inner_source(&self, org_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO inner_source_orgs (organization_id) VALUES (?1)",
            params![org_id],
        )?;
        Ok(())
    }

    fn remove_inner_source(&self, org_id: i64) -> Result<()> {
        self.conn().execute(
            "DELETE FROM inner_source_orgs WHERE organization_id = ?1",
            params![org_id],
        )?;
        Ok(())
    }

    fn is_inner_source(&self, org_id: i64) -> Result<bool> {
        let conn = self.conn();
        let found = conn
            .query_row(
                "SELECT 1 FROM inner_source_orgs WHERE organization_id = ?1",
                params![org_id],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn add_team_privilege(
        &self,
        team_id: i64,
        org_id: i64,
        repo_id: i64,
        privilege: CustomPrivilege,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO team_custom_privileges (team_id, organization_id, repo_id, privilege)
             VALUES (?1, ?2, ?3, ?4)",
            params![team_id, org_id, repo_id, privilege.as_str()],
        )?;
        Ok(())
    }

    fn has_team_privilege(
        &self,
        user_id: i64,
        org_id: i64,
        repo_id: i64,
        privilege: CustomPrivilege,
    ) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM team_custom_privileges p
             JOIN team_users tu ON tu.team_id = p.team_id
             WHERE tu.user_id = ?1 AND p.organization_id = ?2 AND p.repo_id = ?3 AND p.privilege = ?4",
            params![user_id, org_id, repo_id, privilege.as_str()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
