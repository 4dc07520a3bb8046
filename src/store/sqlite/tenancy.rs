use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{SqliteStore, constraint_violation, format_datetime, map_conflict, parse_datetime};
use crate::error::{Error, Result};
use crate::store::TenantStore;
use crate::types::{Tenant, TenantOrganization};

const TENANT_COLUMNS: &str = "id, name, org_key, is_default, is_active, created_at, updated_at";
const LINK_COLUMNS: &str = "id, tenant_id, organization_id, org_key, project_key";

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        id: row.get(0)?,
        name: row.get(1)?,
        org_key: row.get(2)?,
        is_default: row.get(3)?,
        is_active: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn link_from_row(row: &Row<'_>) -> rusqlite::Result<TenantOrganization> {
    Ok(TenantOrganization {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        organization_id: row.get(2)?,
        org_key: row.get(3)?,
        project_key: row.get(4)?,
    })
}

impl SqliteStore {
    fn tenant_where(&self, clause: &str, value: &str) -> Result<Option<Tenant>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TENANT_COLUMNS} FROM sc_tenant WHERE {clause}"),
            params![value],
            tenant_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn link_where(&self, clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<TenantOrganization>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {LINK_COLUMNS} FROM sc_tenant_organizations WHERE {clause} LIMIT 1"),
            args,
            link_from_row,
        )
        .optional()
        .map_err(Error::from)
    }
}

impl TenantStore for SqliteStore {
    fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!("SELECT {TENANT_COLUMNS} FROM sc_tenant"))?;
        let rows = stmt.query_map([], tenant_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_tenant_by_id(&self, id: &str) -> Result<Option<Tenant>> {
        self.tenant_where("id = ?1", id)
    }

    fn get_tenant_by_name(&self, name: &str) -> Result<Option<Tenant>> {
        self.tenant_where("name = ?1", name)
    }

    fn get_tenant_by_org_key(&self, org_key: &str) -> Result<Option<Tenant>> {
        self.tenant_where("org_key = ?1", org_key)
    }

    fn get_default_tenant(&self) -> Result<Option<Tenant>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TENANT_COLUMNS} FROM sc_tenant WHERE is_default = 1"),
            [],
            tenant_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn insert_tenant(&self, tenant: &Tenant) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO sc_tenant (id, name, org_key, is_default, is_active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    tenant.id,
                    tenant.name,
                    tenant.org_key,
                    tenant.is_default,
                    tenant.is_active,
                    format_datetime(&tenant.created_at),
                    format_datetime(&tenant.updated_at),
                ],
            )
            .map_err(|e| map_conflict(e, &format!("tenant {}", tenant.name)))?;
        Ok(())
    }

    fn update_tenant(&self, tenant: &Tenant) -> Result<()> {
        let rows = self
            .conn()
            .execute(
                "UPDATE sc_tenant SET name = ?1, is_active = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    tenant.name,
                    tenant.is_active,
                    format_datetime(&Utc::now()),
                    tenant.id
                ],
            )
            .map_err(|e| map_conflict(e, &format!("tenant {}", tenant.name)))?;

        if rows == 0 {
            return Err(Error::TenantNotFound(tenant.id.clone()));
        }
        Ok(())
    }

    fn delete_tenant(&self, id: &str, org_ids: &[i64]) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        for org_id in org_ids {
            tx.execute(
                "DELETE FROM sc_tenant_organizations WHERE tenant_id = ?1 AND organization_id = ?2",
                params![id, org_id],
            )?;
        }

        tx.execute("DELETE FROM role_bindings WHERE tenant_id = ?1", params![id])?;

        let rows = tx.execute("DELETE FROM sc_tenant WHERE id = ?1", params![id])?;
        if rows == 0 {
            return Err(Error::TenantNotFound(id.to_string()));
        }

        tx.commit()?;
        Ok(())
    }

    fn insert_tenant_org(&self, link: &TenantOrganization) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO sc_tenant_organizations (id, tenant_id, organization_id, org_key, project_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                link.id,
                link.tenant_id,
                link.organization_id,
                link.org_key,
                link.project_key
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(e) => match constraint_violation(&e) {
                Some(msg) if msg.contains("project_key") => {
                    Err(Error::ProjectKeyAlreadyUsed(link.project_key.clone()))
                }
                Some(_) => Err(Error::AlreadyExists(format!(
                    "tenant organization for org {}",
                    link.organization_id
                ))),
                None => Err(Error::Database(e)),
            },
        }
    }

    fn delete_tenant_org_by_org(&self, org_id: i64) -> Result<bool> {
        let rows = self.conn().execute(
            "DELETE FROM sc_tenant_organizations WHERE organization_id = ?1",
            params![org_id],
        )?;
        Ok(rows > 0)
    }

    fn list_tenant_orgs(&self) -> Result<Vec<TenantOrganization>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare(&format!("SELECT {LINK_COLUMNS} FROM sc_tenant_organizations"))?;
        let rows = stmt.query_map([], link_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_tenant_orgs_by_tenant(&self, tenant_id: &str) -> Result<Vec<TenantOrganization>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {LINK_COLUMNS} FROM sc_tenant_organizations WHERE tenant_id = ?1"
        ))?;
        let rows = stmt.query_map(params![tenant_id], link_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn get_tenant_org_by_org(&self, org_id: i64) -> Result<Option<TenantOrganization>> {
        self.link_where("organization_id = ?1", &[&org_id])
    }

    fn get_tenant_org_by_keys(
        &self,
        org_key: &str,
        project_key: &str,
    ) -> Result<Option<TenantOrganization>> {
        self.link_where("org_key = ?1 AND project_key = ?2", &[&org_key, &project_key])
    }

    fn get_tenant_org_by_project_key(
        &self,
        project_key: &str,
    ) -> Result<Option<TenantOrganization>> {
        self.link_where("project_key = ?1", &[&project_key])
    }

    fn tenant_org_exists(&self, tenant_id: &str, org_id: i64) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM sc_tenant_organizations WHERE tenant_id = ?1 AND organization_id = ?2",
            params![tenant_id, org_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
