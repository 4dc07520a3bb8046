use chrono::Utc;
use rusqlite::{OptionalExtension, Row, params};

use super::{SqliteStore, format_datetime, map_conflict, parse_datetime};
use crate::error::{Error, Result};
use crate::store::{DirectoryStore, NewRepository};
use crate::types::{
    NewUser, Organization, PublicKey, RepoKey, Repository, Team, Token, UNIQUE_CLONES_METRIC_KEY,
    User, Visibility,
};

const USER_COLUMNS: &str = "id, name, lower_name, email, login_name, external_id, password_hash, \
     is_active, is_admin, allow_create_org, created_at, updated_at";
const ORG_COLUMNS: &str = "id, name, visibility, is_active, created_at";
const REPO_COLUMNS: &str = "r.id, r.owner_id, r.owner_name, r.name, r.lower_name, r.default_branch, \
     r.size, r.is_private, r.created_at, r.updated_at";
const KEY_COLUMNS: &str = "id, owner_id, name, fingerprint, content, created_at";
const TOKEN_COLUMNS: &str =
    "id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at, last_used_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        lower_name: row.get(2)?,
        email: row.get(3)?,
        login_name: row.get(4)?,
        external_id: row.get(5)?,
        password_hash: row.get(6)?,
        is_active: row.get(7)?,
        is_admin: row.get(8)?,
        allow_create_org: row.get(9)?,
        created_at: parse_datetime(&row.get::<_, String>(10)?),
        updated_at: parse_datetime(&row.get::<_, String>(11)?),
    })
}

fn org_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    let visibility: String = row.get(2)?;
    Ok(Organization {
        id: row.get(0)?,
        name: row.get(1)?,
        visibility: Visibility::parse(&visibility).unwrap_or_default(),
        is_active: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn repo_from_row(row: &Row<'_>) -> rusqlite::Result<Repository> {
    Ok(Repository {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        owner_name: row.get(2)?,
        name: row.get(3)?,
        lower_name: row.get(4)?,
        default_branch: row.get(5)?,
        size: row.get(6)?,
        is_private: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn key_from_row(row: &Row<'_>) -> rusqlite::Result<PublicKey> {
    Ok(PublicKey {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        name: row.get(2)?,
        fingerprint: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn token_from_row(row: &Row<'_>) -> rusqlite::Result<Token> {
    Ok(Token {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        is_admin: row.get(3)?,
        user_id: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        expires_at: row.get::<_, Option<String>>(6)?.map(|s| parse_datetime(&s)),
        last_used_at: row.get::<_, Option<String>>(7)?.map(|s| parse_datetime(&s)),
    })
}

impl SqliteStore {
    fn users_where(&self, clause: &str, value: &dyn rusqlite::ToSql) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {USER_COLUMNS} FROM users WHERE {clause}"),
            [value],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn org_where(&self, clause: &str, value: &dyn rusqlite::ToSql) -> Result<Option<Organization>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {ORG_COLUMNS} FROM organizations WHERE {clause}"),
            [value],
            org_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn repo_where(&self, clause: &str, args: &[&dyn rusqlite::ToSql]) -> Result<Option<Repository>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {REPO_COLUMNS} FROM repositories r {clause}"),
            args,
            repo_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn members_of(&self, sql: &str, id: i64) -> Result<Vec<User>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![id], user_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }
}

impl DirectoryStore for SqliteStore {
    // User operations

    fn create_user(&self, user: &NewUser) -> Result<User> {
        let now = format_datetime(&Utc::now());
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO users (name, lower_name, email, login_name, external_id, password_hash,
                                    is_admin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                params![
                    user.name,
                    user.name.to_lowercase(),
                    user.email,
                    user.name,
                    user.external_id,
                    user.password_hash,
                    user.is_admin,
                    now
                ],
            )
            .map_err(|e| map_conflict(e, &format!("user {}", user.name)))?;
            conn.last_insert_rowid()
        };

        self.get_user(id)?
            .ok_or_else(|| Error::Internal(format!("user {id} vanished after insert")))
    }

    fn get_user(&self, id: i64) -> Result<Option<User>> {
        self.users_where("id = ?1", &id)
    }

    fn get_user_by_external_id(&self, external_id: &str) -> Result<Option<User>> {
        self.users_where("external_id = ?1", &external_id)
    }

    fn get_user_by_login(&self, login: &str) -> Result<Option<User>> {
        self.users_where("lower_name = lower(?1) OR lower(email) = lower(?1)", &login)
    }

    fn set_user_active(&self, id: i64, active: bool) -> Result<()> {
        let rows = self.conn().execute(
            "UPDATE users SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active, format_datetime(&Utc::now()), id],
        )?;
        if rows == 0 {
            return Err(Error::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    // Organization operations

    fn create_organization(&self, name: &str, visibility: Visibility) -> Result<Organization> {
        let id = {
            let conn = self.conn();
            conn.execute(
                "INSERT INTO organizations (name, lower_name, visibility, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    name,
                    name.to_lowercase(),
                    visibility.as_str(),
                    format_datetime(&Utc::now())
                ],
            )
            .map_err(|e| map_conflict(e, &format!("organization {name}")))?;
            conn.last_insert_rowid()
        };

        self.get_organization(id)?
            .ok_or_else(|| Error::Internal(format!("organization {id} vanished after insert")))
    }

    fn get_organization(&self, id: i64) -> Result<Option<Organization>> {
        self.org_where("id = ?1", &id)
    }

    fn get_organization_by_name(&self, name: &str) -> Result<Option<Organization>> {
        self.org_where("lower_name = lower(?1)", &name)
    }

    fn list_organizations(&self) -> Result<Vec<Organization>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {ORG_COLUMNS} FROM organizations ORDER BY id"
        ))?;
        let rows = stmt.query_map([], org_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn update_organization(&self, org: &Organization) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let rows = tx
            .execute(
                "UPDATE organizations SET name = ?1, lower_name = ?2, visibility = ?3, is_active = ?4
                 WHERE id = ?5",
                params![
                    org.name,
                    org.name.to_lowercase(),
                    org.visibility.as_str(),
                    org.is_active,
                    org.id
                ],
            )
            .map_err(|e| map_conflict(e, &format!("organization {}", org.name)))?;
        if rows == 0 {
            return Err(Error::NotFound(format!("organization {}", org.id)));
        }

        // Repositories carry a denormalized owner name.
        tx.execute(
            "UPDATE repositories SET owner_name = ?1 WHERE owner_id = ?2",
            params![org.name, org.id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn delete_organization(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM organizations WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn replace_visibility(&self, from: Visibility, to: Visibility) -> Result<usize> {
        let rows = self.conn().execute(
            "UPDATE organizations SET visibility = ?1 WHERE visibility = ?2",
            params![to.as_str(), from.as_str()],
        )?;
        Ok(rows)
    }

    // Membership operations

    fn add_org_member(&self, org_id: i64, user_id: i64) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO org_members (organization_id, user_id) VALUES (?1, ?2)",
            params![org_id, user_id],
        )?;
        Ok(())
    }

    fn list_org_members(&self, org_id: i64) -> Result<Vec<User>> {
        self.members_of(
            &format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id IN (SELECT user_id FROM org_members WHERE organization_id = ?1)
                 ORDER BY id"
            ),
            org_id,
        )
    }

    fn create_team(&self, org_id: i64, name: &str, is_owner_team: bool) -> Result<Team> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO teams (organization_id, name, is_owner_team) VALUES (?1, ?2, ?3)",
            params![org_id, name, is_owner_team],
        )
        .map_err(|e| map_conflict(e, &format!("team {name}")))?;

        Ok(Team {
            id: conn.last_insert_rowid(),
            organization_id: org_id,
            name: name.to_string(),
            is_owner_team,
        })
    }

    fn get_team_by_name(&self, org_id: i64, name: &str) -> Result<Option<Team>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, organization_id, name, is_owner_team FROM teams
             WHERE organization_id = ?1 AND name = ?2",
            params![org_id, name],
            |row| {
                Ok(Team {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                    is_owner_team: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_owner_team(&self, org_id: i64) -> Result<Option<Team>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT id, organization_id, name, is_owner_team FROM teams
             WHERE organization_id = ?1 AND is_owner_team = 1 LIMIT 1",
            params![org_id],
            |row| {
                Ok(Team {
                    id: row.get(0)?,
                    organization_id: row.get(1)?,
                    name: row.get(2)?,
                    is_owner_team: row.get(3)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn add_team_member(&self, team_id: i64, user_id: i64) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let org_id: i64 = tx
            .query_row(
                "SELECT organization_id FROM teams WHERE id = ?1",
                params![team_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("team {team_id}")))?;

        tx.execute(
            "INSERT OR IGNORE INTO team_users (team_id, user_id, organization_id) VALUES (?1, ?2, ?3)",
            params![team_id, user_id, org_id],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO org_members (organization_id, user_id) VALUES (?1, ?2)",
            params![org_id, user_id],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn list_team_members(&self, team_id: i64) -> Result<Vec<User>> {
        self.members_of(
            &format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE id IN (SELECT user_id FROM team_users WHERE team_id = ?1)
                 ORDER BY id"
            ),
            team_id,
        )
    }

    // Repository operations

    fn create_repository(&self, repo: &NewRepository<'_>) -> Result<(Repository, RepoKey)> {
        let now = format_datetime(&Utc::now());
        let repo_key = uuid::Uuid::new_v4().to_string();

        let id = {
            let mut conn = self.conn();
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO repositories (owner_id, owner_name, name, lower_name, default_branch,
                                           is_private, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    repo.owner.id,
                    repo.owner.name,
                    repo.name,
                    repo.name.to_lowercase(),
                    repo.default_branch,
                    repo.is_private,
                    now
                ],
            )
            .map_err(|e| map_conflict(e, &format!("repository {}/{}", repo.owner.name, repo.name)))?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "INSERT INTO sc_repo_key (repo_id, repo_key) VALUES (?1, ?2)",
                params![id, repo_key],
            )?;
            tx.execute(
                "INSERT OR IGNORE INTO internal_metric_counter (repo_id, metric_key, metric_value, updated_at)
                 VALUES (?1, ?2, 0, ?3)",
                params![id, UNIQUE_CLONES_METRIC_KEY, now],
            )?;

            tx.commit()?;
            id
        };

        let created = self
            .get_repository(id)?
            .ok_or_else(|| Error::Internal(format!("repository {id} vanished after insert")))?;
        Ok((
            created,
            RepoKey {
                repo_id: id,
                repo_key,
            },
        ))
    }

    fn get_repository(&self, id: i64) -> Result<Option<Repository>> {
        self.repo_where("WHERE r.id = ?1", &[&id])
    }

    fn get_repository_by_name(&self, owner_name: &str, name: &str) -> Result<Option<Repository>> {
        self.repo_where(
            "WHERE lower(r.owner_name) = lower(?1) AND r.lower_name = lower(?2)",
            &[&owner_name, &name],
        )
    }

    fn get_repository_by_key(&self, repo_key: &str) -> Result<Option<Repository>> {
        self.repo_where(
            "JOIN sc_repo_key k ON k.repo_id = r.id WHERE k.repo_key = ?1",
            &[&repo_key],
        )
    }

    fn get_repo_key(&self, repo_id: i64) -> Result<Option<RepoKey>> {
        let conn = self.conn();
        conn.query_row(
            "SELECT repo_id, repo_key FROM sc_repo_key WHERE repo_id = ?1",
            params![repo_id],
            |row| {
                Ok(RepoKey {
                    repo_id: row.get(0)?,
                    repo_key: row.get(1)?,
                })
            },
        )
        .optional()
        .map_err(Error::from)
    }

    fn update_repository_default_branch(&self, id: i64, branch: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE repositories SET default_branch = ?1, updated_at = ?2 WHERE id = ?3",
            params![branch, format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn update_repository_size(&self, id: i64, size: i64) -> Result<()> {
        self.conn().execute(
            "UPDATE repositories SET size = ?1, updated_at = ?2 WHERE id = ?3",
            params![size, format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn list_repositories(&self, owner_id: i64) -> Result<Vec<Repository>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPO_COLUMNS} FROM repositories r WHERE r.owner_id = ?1 ORDER BY r.lower_name"
        ))?;
        let rows = stmt.query_map(params![owner_id], repo_from_row)?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn delete_repository(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM repositories WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // Public key operations

    fn add_public_key(
        &self,
        owner_id: i64,
        name: &str,
        content: &str,
        fingerprint: &str,
    ) -> Result<PublicKey> {
        let created_at = Utc::now();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO public_keys (owner_id, name, fingerprint, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![owner_id, name, fingerprint, content, format_datetime(&created_at)],
        )
        .map_err(|e| map_conflict(e, &format!("public key {name}")))?;

        Ok(PublicKey {
            id: conn.last_insert_rowid(),
            owner_id,
            name: name.to_string(),
            fingerprint: fingerprint.to_string(),
            content: content.to_string(),
            created_at,
        })
    }

    fn get_public_key(&self, id: i64) -> Result<Option<PublicKey>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {KEY_COLUMNS} FROM public_keys WHERE id = ?1"),
            params![id],
            key_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn get_public_key_by_content(&self, content: &str) -> Result<Option<PublicKey>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {KEY_COLUMNS} FROM public_keys WHERE content = ?1"),
            params![content],
            key_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    // Token operations

    fn create_token(&self, token: &Token) -> Result<()> {
        self.conn()
            .execute(
                "INSERT INTO tokens (id, token_hash, token_lookup, is_admin, user_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    token.id,
                    token.token_hash,
                    token.token_lookup,
                    token.is_admin,
                    token.user_id,
                    format_datetime(&token.created_at),
                    token.expires_at.as_ref().map(format_datetime),
                ],
            )
            .map_err(|e| map_conflict(e, "token lookup"))?;
        Ok(())
    }

    fn get_token_by_lookup(&self, lookup: &str) -> Result<Option<Token>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE token_lookup = ?1"),
            params![lookup],
            token_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_token(&self, id: &str) -> Result<bool> {
        let rows = self
            .conn()
            .execute("DELETE FROM tokens WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    fn update_token_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE tokens SET last_used_at = ?1 WHERE id = ?2",
            params![format_datetime(&Utc::now()), id],
        )?;
        Ok(())
    }

    fn has_admin_token(&self) -> Result<bool> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tokens WHERE is_admin = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
