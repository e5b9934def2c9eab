use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{
    Connection, OptionalExtension, Row, Transaction, TransactionBehavior, params, params_from_iter,
};

use super::{Check, DeletedFile, PermissionHolders, Store, UserAssignments, UserChange};
use super::listing::{FolderFilter, ItemQuery, ListQuery, Page, like_pattern};
use super::schema::SCHEMA;
use crate::error::{Error, Result};
use crate::types::*;

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Opens a write transaction that takes the database lock up front, so the
/// reads that validate a replace-all see the state the writes apply to.
fn immediate(conn: &mut Connection) -> Result<Transaction<'_>> {
    conn.transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(Error::from)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Handle SQLite's default datetime format: "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            tracing::error!("Invalid datetime in database: '{}' - {}", s, e);
            Utc::now()
        })
}

fn parse_optional_datetime(s: Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref().map(parse_datetime)
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn now() -> String {
    format_datetime(&Utc::now())
}

const USER_COLUMNS: &str =
    "id, name, username, email, password_hash, email_verified_at, created_at, updated_at";
const CATALOG_COLUMNS: &str = "id, name, guard_name, created_at, updated_at";
const FOLDER_COLUMNS: &str = "id, owner_id, parent_id, name, created_at, updated_at";
const NOTE_COLUMNS: &str = "id, owner_id, folder_id, title, content, created_at, updated_at";
const FILE_COLUMNS: &str = "id, owner_id, folder_id, title, original_name, storage_path, mime_type, size_bytes, created_at, updated_at";
const SESSION_COLUMNS: &str =
    "id, token_hash, token_lookup, user_id, created_at, expires_at, last_used_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        password_hash: row.get(4)?,
        email_verified_at: parse_optional_datetime(row.get(5)?),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
        updated_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

fn role_from_row(row: &Row<'_>) -> rusqlite::Result<Role> {
    Ok(Role {
        id: row.get(0)?,
        name: row.get(1)?,
        guard_name: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn permission_from_row(row: &Row<'_>) -> rusqlite::Result<Permission> {
    Ok(Permission {
        id: row.get(0)?,
        name: row.get(1)?,
        guard_name: row.get(2)?,
        created_at: parse_datetime(&row.get::<_, String>(3)?),
        updated_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

fn folder_from_row(kind: FolderKind) -> impl Fn(&Row<'_>) -> rusqlite::Result<Folder> {
    move |row| {
        Ok(Folder {
            id: row.get(0)?,
            kind,
            owner_id: row.get(1)?,
            parent_id: row.get(2)?,
            name: row.get(3)?,
            created_at: parse_datetime(&row.get::<_, String>(4)?),
            updated_at: parse_datetime(&row.get::<_, String>(5)?),
        })
    }
}

fn note_from_row(row: &Row<'_>) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        folder_id: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        updated_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileItem> {
    Ok(FileItem {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        folder_id: row.get(2)?,
        title: row.get(3)?,
        original_name: row.get(4)?,
        storage_path: row.get(5)?,
        mime_type: row.get(6)?,
        size_bytes: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        updated_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        token_hash: row.get(1)?,
        token_lookup: row.get(2)?,
        user_id: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
        expires_at: parse_datetime(&row.get::<_, String>(5)?),
        last_used_at: parse_optional_datetime(row.get(6)?),
    })
}

/// One side of the assignment graph: rows of `join_table` link an owner
/// (`owner_table`) to targets (`target_table`).
struct Assignment {
    join_table: &'static str,
    owner_table: &'static str,
    owner_column: &'static str,
    target_table: &'static str,
    target_column: &'static str,
    label: &'static str,
}

const ROLE_PERMISSIONS: Assignment = Assignment {
    join_table: "role_has_permissions",
    owner_table: "roles",
    owner_column: "role_id",
    target_table: "permissions",
    target_column: "permission_id",
    label: "permission",
};

const PERMISSION_ROLES: Assignment = Assignment {
    join_table: "role_has_permissions",
    owner_table: "permissions",
    owner_column: "permission_id",
    target_table: "roles",
    target_column: "role_id",
    label: "role",
};

const USER_ROLES: Assignment = Assignment {
    join_table: "user_has_roles",
    owner_table: "users",
    owner_column: "user_id",
    target_table: "roles",
    target_column: "role_id",
    label: "role",
};

const USER_PERMISSIONS: Assignment = Assignment {
    join_table: "user_has_permissions",
    owner_table: "users",
    owner_column: "user_id",
    target_table: "permissions",
    target_column: "permission_id",
    label: "permission",
};

impl Assignment {
    /// Returns the guard targets must share with the owner. Users are not
    /// scoped to a guard, so any guard is accepted for them.
    fn owner_guard(&self, conn: &Connection, owner_id: i64) -> Result<Option<String>> {
        if self.owner_table == "users" {
            let exists = conn
                .query_row(
                    "SELECT 1 FROM users WHERE id = ?1 AND deleted_at IS NULL",
                    params![owner_id],
                    |_| Ok(()),
                )
                .optional()?;
            return exists.map(|()| None).ok_or(Error::NotFound);
        }

        conn.query_row(
            &format!("SELECT guard_name FROM {} WHERE id = ?1", self.owner_table),
            params![owner_id],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(Some)
        .ok_or(Error::NotFound)
    }

    /// Resolves target ids to `(name, guard)` pairs.
    fn resolve(
        &self,
        conn: &Connection,
        ids: &[i64],
        guard: Option<&str>,
    ) -> Result<Vec<(String, String)>> {
        let mut seen = HashSet::with_capacity(ids.len());
        let mut resolved = Vec::with_capacity(ids.len());
        let sql = format!(
            "SELECT name, guard_name FROM {} WHERE id = ?1",
            self.target_table
        );

        for &id in ids {
            if !seen.insert(id) {
                return Err(Error::validation(format!(
                    "duplicate {} id {}",
                    self.label, id
                )));
            }

            let (name, target_guard): (String, String) = conn
                .query_row(&sql, params![id], |row| Ok((row.get(0)?, row.get(1)?)))
                .optional()?
                .ok_or_else(|| Error::validation(format!("unknown {} id {}", self.label, id)))?;

            if let Some(expected) = guard {
                if target_guard != expected {
                    return Err(Error::validation(format!(
                        "{} '{}' belongs to guard '{}', expected '{}'",
                        self.label, name, target_guard, expected
                    )));
                }
            }

            resolved.push((name, target_guard));
        }

        Ok(resolved)
    }

    /// Makes the owner's assignment set exactly `ids`. Must run inside a transaction.
    fn replace(&self, conn: &Connection, owner_id: i64, ids: &[i64]) -> Result<()> {
        let guard = self.owner_guard(conn, owner_id)?;
        let targets = self.resolve(conn, ids, guard.as_deref())?;

        conn.execute(
            &format!(
                "DELETE FROM {} WHERE {} = ?1",
                self.join_table, self.owner_column
            ),
            params![owner_id],
        )?;

        let insert = format!(
            "INSERT INTO {} ({}, {}) SELECT ?1, id FROM {} WHERE name = ?2 AND guard_name = ?3",
            self.join_table, self.owner_column, self.target_column, self.target_table
        );
        for (name, target_guard) in &targets {
            let inserted = conn.execute(&insert, params![owner_id, name, target_guard])?;
            if inserted != 1 {
                return Err(Error::ConflictOnWrite(format!(
                    "{} '{}' changed while assignments were being replaced",
                    self.label, name
                )));
            }
        }

        Ok(())
    }
}

/// WHERE clause builder with positional parameters.
#[derive(Default)]
struct Filter {
    clauses: Vec<String>,
    values: Vec<Value>,
}

impl Filter {
    fn bind(&mut self, value: Value) -> String {
        self.values.push(value);
        format!("?{}", self.values.len())
    }

    fn and(&mut self, clause: String) {
        self.clauses.push(clause);
    }

    fn search(&mut self, term: Option<&str>, columns: &[&str]) {
        let Some(term) = term else {
            return;
        };
        let placeholder = self.bind(Value::Text(like_pattern(term)));
        let ors: Vec<String> = columns
            .iter()
            .map(|c| format!("{c} LIKE {placeholder} ESCAPE '\\'"))
            .collect();
        self.and(format!("({})", ors.join(" OR ")));
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

struct PageWindow<'a> {
    order_by: &'a str,
    page: u32,
    per_page: u32,
    offset: u32,
}

fn paginate<T, F>(
    conn: &Connection,
    table: &str,
    columns: &str,
    filter: &Filter,
    window: &PageWindow<'_>,
    map: F,
) -> Result<Page<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let where_sql = filter.where_sql();
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {table} {where_sql}"),
        params_from_iter(filter.values.iter()),
        |row| row.get(0),
    )?;

    let mut values = filter.values.clone();
    values.push(Value::Integer(i64::from(window.per_page)));
    values.push(Value::Integer(i64::from(window.offset)));
    let sql = format!(
        "SELECT {columns} FROM {table} {where_sql} ORDER BY {} LIMIT ?{} OFFSET ?{}",
        window.order_by,
        values.len() - 1,
        values.len()
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(values.iter()), map)?;
    let data = rows
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)?;

    Ok(Page::new(data, total, window.page, window.per_page))
}

fn catalog_page<T, F>(
    conn: &Connection,
    table: &str,
    query: &ListQuery,
    map: F,
) -> Result<Page<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut filter = Filter::default();
    if let Some(guard) = &query.guard {
        let p = filter.bind(Value::Text(guard.clone()));
        filter.and(format!("guard_name = {p}"));
    }
    filter.search(query.search.as_deref(), &["name"]);

    let order_by = query.order_by();
    let window = PageWindow {
        order_by: &order_by,
        page: query.page,
        per_page: query.per_page,
        offset: query.offset(),
    };
    paginate(conn, table, CATALOG_COLUMNS, &filter, &window, map)
}

fn item_page<T, F>(
    conn: &Connection,
    table: &str,
    columns: &str,
    owner_id: UserId,
    query: &ItemQuery,
    search_columns: &[&str],
    map: F,
) -> Result<Page<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut filter = Filter::default();
    let p = filter.bind(Value::Integer(owner_id));
    filter.and(format!("owner_id = {p}"));
    match query.folder {
        FolderFilter::Any => {}
        FolderFilter::Unfiled => filter.and("folder_id IS NULL".to_string()),
        FolderFilter::In(folder_id) => {
            let p = filter.bind(Value::Integer(folder_id));
            filter.and(format!("folder_id = {p}"));
        }
    }
    filter.search(query.search.as_deref(), search_columns);

    let window = PageWindow {
        order_by: "created_at DESC, id DESC",
        page: query.page,
        per_page: query.per_page,
        offset: query.offset(),
    };
    paginate(conn, table, columns, &filter, &window, map)
}

fn fetch_user(conn: &Connection, id: UserId) -> Result<Option<User>> {
    conn.query_row(
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1 AND deleted_at IS NULL"),
        params![id],
        user_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn fetch_role(conn: &Connection, id: RoleId) -> Result<Option<Role>> {
    conn.query_row(
        &format!("SELECT {CATALOG_COLUMNS} FROM roles WHERE id = ?1"),
        params![id],
        role_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn fetch_permission(conn: &Connection, id: PermissionId) -> Result<Option<Permission>> {
    conn.query_row(
        &format!("SELECT {CATALOG_COLUMNS} FROM permissions WHERE id = ?1"),
        params![id],
        permission_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn fetch_folder(conn: &Connection, kind: FolderKind, id: i64) -> Result<Option<Folder>> {
    conn.query_row(
        &format!(
            "SELECT {FOLDER_COLUMNS} FROM {} WHERE id = ?1",
            kind.folder_table()
        ),
        params![id],
        folder_from_row(kind),
    )
    .optional()
    .map_err(Error::from)
}

fn fetch_note(conn: &Connection, id: i64) -> Result<Option<Note>> {
    conn.query_row(
        &format!("SELECT {NOTE_COLUMNS} FROM notes WHERE id = ?1"),
        params![id],
        note_from_row,
    )
    .optional()
    .map_err(Error::from)
}

fn fetch_file(conn: &Connection, id: i64) -> Result<Option<FileItem>> {
    conn.query_row(
        &format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?1"),
        params![id],
        file_from_row,
    )
    .optional()
    .map_err(Error::from)
}

/// Inserts a role or permission row and returns its id.
fn insert_catalog_entry(conn: &Connection, table: &str, name: &str, guard: &str) -> Result<i64> {
    let now = now();
    conn.execute(
        &format!("INSERT INTO {table} (name, guard_name, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)"),
        params![name, guard, now],
    )?;
    Ok(conn.last_insert_rowid())
}

fn rename_catalog_entry(conn: &Connection, table: &str, id: i64, name: &str) -> Result<()> {
    let updated = conn.execute(
        &format!("UPDATE {table} SET name = ?1, updated_at = ?2 WHERE id = ?3"),
        params![name, now(), id],
    )?;
    if updated == 0 {
        return Err(Error::NotFound);
    }
    Ok(())
}

fn delete_by_ids(conn: &mut Connection, table: &str, ids: &[i64]) -> Result<usize> {
    let tx = immediate(conn)?;
    let sql = format!("DELETE FROM {table} WHERE id = ?1");
    let mut deleted = 0;
    for id in ids {
        deleted += tx.execute(&sql, params![id])?;
    }
    tx.commit()?;
    Ok(deleted)
}

fn count_where_guard(conn: &Connection, table: &str, guard: Option<&str>) -> Result<i64> {
    let count = match guard {
        Some(guard) => conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE guard_name = ?1"),
            params![guard],
            |row| row.get(0),
        )?,
        None => conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?,
    };
    Ok(count)
}

fn list_catalog<T, F>(conn: &Connection, table: &str, guard: Option<&str>, map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut filter = Filter::default();
    if let Some(guard) = guard {
        let p = filter.bind(Value::Text(guard.to_string()));
        filter.and(format!("guard_name = {p}"));
    }
    let mut stmt = conn.prepare(&format!(
        "SELECT {CATALOG_COLUMNS} FROM {table} {} ORDER BY name, id",
        filter.where_sql()
    ))?;
    let rows = stmt.query_map(params_from_iter(filter.values.iter()), map)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

fn query_list<T, F>(conn: &Connection, sql: &str, id: i64, map: F) -> Result<Vec<T>>
where
    F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![id], map)?;
    rows.collect::<std::result::Result<Vec<_>, _>>()
        .map_err(Error::from)
}

/// Resolves requested assignment ids to rows. Unknown or repeated ids are a
/// validation failure.
fn fetch_requested<T>(
    conn: &Connection,
    ids: &[i64],
    label: &str,
    fetch: fn(&Connection, i64) -> Result<Option<T>>,
) -> Result<Vec<T>> {
    let mut seen = HashSet::with_capacity(ids.len());
    ids.iter()
        .map(|&id| {
            if !seen.insert(id) {
                return Err(Error::validation(format!("duplicate {label} id {id}")));
            }
            fetch(conn, id)?.ok_or_else(|| Error::validation(format!("unknown {label} id {id}")))
        })
        .collect()
}

fn roles_of_user(conn: &Connection, user_id: UserId) -> Result<Vec<Role>> {
    query_list(
        conn,
        "SELECT r.id, r.name, r.guard_name, r.created_at, r.updated_at
         FROM roles r
         JOIN user_has_roles ur ON ur.role_id = r.id
         WHERE ur.user_id = ?1
         ORDER BY r.id",
        user_id,
        role_from_row,
    )
}

fn direct_permissions_of_user(conn: &Connection, user_id: UserId) -> Result<Vec<Permission>> {
    query_list(
        conn,
        "SELECT p.id, p.name, p.guard_name, p.created_at, p.updated_at
         FROM permissions p
         JOIN user_has_permissions up ON up.permission_id = p.id
         WHERE up.user_id = ?1
         ORDER BY p.name",
        user_id,
        permission_from_row,
    )
}

fn roles_of_permission(conn: &Connection, permission_id: PermissionId) -> Result<Vec<Role>> {
    query_list(
        conn,
        "SELECT r.id, r.name, r.guard_name, r.created_at, r.updated_at
         FROM roles r
         JOIN role_has_permissions rp ON rp.role_id = r.id
         WHERE rp.permission_id = ?1
         ORDER BY r.name",
        permission_id,
        role_from_row,
    )
}

impl Store for SqliteStore {
    fn initialize(&self) -> Result<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    // User operations

    fn create_user(
        &self,
        user: &NewUser,
        role_ids: &[RoleId],
        permission_ids: &[PermissionId],
    ) -> Result<User> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;
        let now = now();

        tx.execute(
            "INSERT INTO users (name, username, email, password_hash, email_verified_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                user.name,
                user.username,
                user.email,
                user.password_hash,
                user.email_verified_at.as_ref().map(format_datetime),
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();

        USER_ROLES.replace(&tx, id, role_ids)?;
        USER_PERMISSIONS.replace(&tx, id, permission_ids)?;

        let created = fetch_user(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(created)
    }

    fn get_user(&self, id: UserId) -> Result<Option<User>> {
        fetch_user(&self.conn(), id)
    }

    fn get_user_by_login(&self, login: &str) -> Result<Option<User>> {
        let conn = self.conn();
        conn.query_row(
            &format!(
                "SELECT {USER_COLUMNS} FROM users
                 WHERE deleted_at IS NULL AND (username = ?1 OR lower(email) = lower(?1))
                 ORDER BY CASE WHEN username = ?1 THEN 0 ELSE 1 END
                 LIMIT 1"
            ),
            params![login],
            user_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_users(&self, query: &ListQuery) -> Result<Page<User>> {
        let conn = self.conn();
        let mut filter = Filter::default();
        filter.and("deleted_at IS NULL".to_string());
        filter.search(query.search.as_deref(), &["name", "username", "email"]);

        let order_by = query.order_by();
        let window = PageWindow {
            order_by: &order_by,
            page: query.page,
            per_page: query.per_page,
            offset: query.offset(),
        };
        paginate(&conn, "users", USER_COLUMNS, &filter, &window, user_from_row)
    }

    fn count_users(&self) -> Result<i64> {
        let conn = self.conn();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM users WHERE deleted_at IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn update_user(
        &self,
        id: UserId,
        change: &UserChange<'_>,
        check: Check<'_, UserAssignments>,
    ) -> Result<()> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;

        let user = fetch_user(&tx, id)?.ok_or(Error::NotFound)?;
        let current = UserAssignments {
            user,
            roles: roles_of_user(&tx, id)?,
            direct_permissions: direct_permissions_of_user(&tx, id)?,
            requested_roles: change
                .role_ids
                .map(|ids| fetch_requested(&tx, ids, "role", fetch_role))
                .transpose()?,
            requested_permissions: change
                .permission_ids
                .map(|ids| fetch_requested(&tx, ids, "permission", fetch_permission))
                .transpose()?,
        };
        check(&current)?;

        if let Some(profile) = change.profile {
            tx.execute(
                "UPDATE users SET name = ?1, username = ?2, email = ?3, password_hash = ?4,
                     email_verified_at = ?5, updated_at = ?6
                 WHERE id = ?7 AND deleted_at IS NULL",
                params![
                    profile.name,
                    profile.username,
                    profile.email,
                    profile.password_hash,
                    profile.email_verified_at.as_ref().map(format_datetime),
                    now(),
                    id,
                ],
            )?;
        }
        if let Some(ids) = change.role_ids {
            USER_ROLES.replace(&tx, id, ids)?;
        }
        if let Some(ids) = change.permission_ids {
            USER_PERMISSIONS.replace(&tx, id, ids)?;
        }

        tx.commit()?;
        Ok(())
    }

    fn delete_users(&self, ids: &[UserId]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;
        let now = now();

        let mut deleted = 0;
        for id in ids {
            deleted += tx.execute(
                "UPDATE users SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
                params![now, id],
            )?;
            tx.execute("DELETE FROM sessions WHERE user_id = ?1", params![id])?;
        }

        tx.commit()?;
        Ok(deleted)
    }

    // Role operations

    fn create_role(
        &self,
        name: &str,
        guard: &str,
        permission_ids: Option<&[PermissionId]>,
    ) -> Result<Role> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;

        let id = insert_catalog_entry(&tx, "roles", name, guard)?;
        if let Some(ids) = permission_ids {
            ROLE_PERMISSIONS.replace(&tx, id, ids)?;
        }

        let role = fetch_role(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(role)
    }

    fn get_role(&self, id: RoleId) -> Result<Option<Role>> {
        fetch_role(&self.conn(), id)
    }

    fn get_role_by_name(&self, name: &str, guard: &str) -> Result<Option<Role>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CATALOG_COLUMNS} FROM roles WHERE name = ?1 AND guard_name = ?2"),
            params![name, guard],
            role_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_roles(&self, query: &ListQuery) -> Result<Page<Role>> {
        catalog_page(&self.conn(), "roles", query, role_from_row)
    }

    fn list_all_roles(&self, guard: Option<&str>) -> Result<Vec<Role>> {
        list_catalog(&self.conn(), "roles", guard, role_from_row)
    }

    fn count_roles(&self, guard: Option<&str>) -> Result<i64> {
        count_where_guard(&self.conn(), "roles", guard)
    }

    fn update_role(
        &self,
        id: RoleId,
        name: Option<&str>,
        permission_ids: Option<&[PermissionId]>,
        check: Check<'_, Role>,
    ) -> Result<Role> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;

        let current = fetch_role(&tx, id)?.ok_or(Error::NotFound)?;
        check(&current)?;

        if let Some(name) = name {
            rename_catalog_entry(&tx, "roles", id, name)?;
        }
        if let Some(ids) = permission_ids {
            ROLE_PERMISSIONS.replace(&tx, id, ids)?;
        }

        let role = fetch_role(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(role)
    }

    fn delete_roles(
        &self,
        ids: &[RoleId],
        select: &dyn Fn(&[Role]) -> Result<Vec<RoleId>>,
    ) -> Result<usize> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;

        let mut roles: Vec<Role> = Vec::with_capacity(ids.len());
        for &id in ids {
            if roles.iter().any(|r| r.id == id) {
                continue;
            }
            if let Some(role) = fetch_role(&tx, id)? {
                roles.push(role);
            }
        }

        let mut deleted = 0;
        for id in select(roles.as_slice())? {
            deleted += tx.execute("DELETE FROM roles WHERE id = ?1", params![id])?;
        }

        tx.commit()?;
        Ok(deleted)
    }

    // Permission operations

    fn create_permission(
        &self,
        name: &str,
        guard: &str,
        role_ids: Option<&[RoleId]>,
        check: Check<'_, PermissionHolders>,
    ) -> Result<Permission> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;

        check(&PermissionHolders {
            permission: None,
            holders: Vec::new(),
            requested: role_ids
                .map(|ids| fetch_requested(&tx, ids, "role", fetch_role))
                .transpose()?,
        })?;

        let id = insert_catalog_entry(&tx, "permissions", name, guard)?;
        if let Some(ids) = role_ids {
            PERMISSION_ROLES.replace(&tx, id, ids)?;
        }

        let permission = fetch_permission(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(permission)
    }

    fn get_permission(&self, id: PermissionId) -> Result<Option<Permission>> {
        fetch_permission(&self.conn(), id)
    }

    fn get_permission_by_name(&self, name: &str, guard: &str) -> Result<Option<Permission>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {CATALOG_COLUMNS} FROM permissions WHERE name = ?1 AND guard_name = ?2"),
            params![name, guard],
            permission_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn list_permissions(&self, query: &ListQuery) -> Result<Page<Permission>> {
        catalog_page(&self.conn(), "permissions", query, permission_from_row)
    }

    fn list_all_permissions(&self, guard: Option<&str>) -> Result<Vec<Permission>> {
        list_catalog(&self.conn(), "permissions", guard, permission_from_row)
    }

    fn count_permissions(&self, guard: Option<&str>) -> Result<i64> {
        count_where_guard(&self.conn(), "permissions", guard)
    }

    fn update_permission(
        &self,
        id: PermissionId,
        name: Option<&str>,
        role_ids: Option<&[RoleId]>,
        check: Check<'_, PermissionHolders>,
    ) -> Result<Permission> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;

        let permission = fetch_permission(&tx, id)?.ok_or(Error::NotFound)?;
        check(&PermissionHolders {
            holders: roles_of_permission(&tx, id)?,
            requested: role_ids
                .map(|ids| fetch_requested(&tx, ids, "role", fetch_role))
                .transpose()?,
            permission: Some(permission),
        })?;

        if let Some(name) = name {
            rename_catalog_entry(&tx, "permissions", id, name)?;
        }
        if let Some(ids) = role_ids {
            PERMISSION_ROLES.replace(&tx, id, ids)?;
        }

        let permission = fetch_permission(&tx, id)?.ok_or(Error::NotFound)?;
        tx.commit()?;
        Ok(permission)
    }

    fn delete_permissions(&self, ids: &[PermissionId]) -> Result<usize> {
        delete_by_ids(&mut self.conn(), "permissions", ids)
    }

    // Assignment graph reads

    fn role_permissions(&self, role_id: RoleId) -> Result<Vec<Permission>> {
        query_list(
            &self.conn(),
            "SELECT p.id, p.name, p.guard_name, p.created_at, p.updated_at
             FROM permissions p
             JOIN role_has_permissions rp ON rp.permission_id = p.id
             WHERE rp.role_id = ?1
             ORDER BY p.name",
            role_id,
            permission_from_row,
        )
    }

    fn permission_roles(&self, permission_id: PermissionId) -> Result<Vec<Role>> {
        roles_of_permission(&self.conn(), permission_id)
    }

    fn user_roles(&self, user_id: UserId) -> Result<Vec<Role>> {
        roles_of_user(&self.conn(), user_id)
    }

    fn user_direct_permissions(&self, user_id: UserId) -> Result<Vec<Permission>> {
        direct_permissions_of_user(&self.conn(), user_id)
    }

    fn user_role_permissions(&self, user_id: UserId) -> Result<Vec<Permission>> {
        query_list(
            &self.conn(),
            "SELECT DISTINCT p.id, p.name, p.guard_name, p.created_at, p.updated_at
             FROM permissions p
             JOIN role_has_permissions rp ON rp.permission_id = p.id
             JOIN user_has_roles ur ON ur.role_id = rp.role_id
             WHERE ur.user_id = ?1
             ORDER BY p.name",
            user_id,
            permission_from_row,
        )
    }

    // Assignment graph replace-all

    fn replace_role_permissions(&self, role_id: RoleId, ids: &[PermissionId]) -> Result<()> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;
        ROLE_PERMISSIONS.replace(&tx, role_id, ids)?;
        tx.commit()?;
        Ok(())
    }

    // Folder operations

    fn create_folder(
        &self,
        kind: FolderKind,
        owner_id: UserId,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Folder> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO {} (owner_id, parent_id, name, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                kind.folder_table()
            ),
            params![owner_id, parent_id, name, now()],
        )?;
        fetch_folder(&conn, kind, conn.last_insert_rowid())?.ok_or(Error::NotFound)
    }

    fn get_folder(&self, kind: FolderKind, id: i64) -> Result<Option<Folder>> {
        fetch_folder(&self.conn(), kind, id)
    }

    fn list_folders(&self, kind: FolderKind, owner_id: UserId) -> Result<Vec<Folder>> {
        query_list(
            &self.conn(),
            &format!(
                "SELECT {FOLDER_COLUMNS} FROM {} WHERE owner_id = ?1 ORDER BY name COLLATE NOCASE, id",
                kind.folder_table()
            ),
            owner_id,
            folder_from_row(kind),
        )
    }

    fn update_folder(&self, folder: &Folder) -> Result<()> {
        let updated = self.conn().execute(
            &format!(
                "UPDATE {} SET name = ?1, parent_id = ?2, updated_at = ?3 WHERE id = ?4",
                folder.kind.folder_table()
            ),
            params![folder.name, folder.parent_id, now(), folder.id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_folder(&self, kind: FolderKind, id: i64) -> Result<bool> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;

        tx.execute(
            &format!(
                "UPDATE {} SET folder_id = NULL WHERE folder_id = ?1",
                kind.item_table()
            ),
            params![id],
        )?;
        tx.execute(
            &format!(
                "UPDATE {} SET parent_id = NULL WHERE parent_id = ?1",
                kind.folder_table()
            ),
            params![id],
        )?;
        let deleted = tx.execute(
            &format!("DELETE FROM {} WHERE id = ?1", kind.folder_table()),
            params![id],
        )?;

        tx.commit()?;
        Ok(deleted > 0)
    }

    // Note operations

    fn create_note(&self, note: &NewNote) -> Result<Note> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO notes (owner_id, folder_id, title, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![note.owner_id, note.folder_id, note.title, note.content, now()],
        )?;
        fetch_note(&conn, conn.last_insert_rowid())?.ok_or(Error::NotFound)
    }

    fn get_note(&self, id: i64) -> Result<Option<Note>> {
        fetch_note(&self.conn(), id)
    }

    fn list_notes(&self, owner_id: UserId, query: &ItemQuery) -> Result<Page<Note>> {
        item_page(
            &self.conn(),
            "notes",
            NOTE_COLUMNS,
            owner_id,
            query,
            &["title", "content"],
            note_from_row,
        )
    }

    fn update_note(&self, note: &Note) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE notes SET folder_id = ?1, title = ?2, content = ?3, updated_at = ?4 WHERE id = ?5",
            params![note.folder_id, note.title, note.content, now(), note.id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_note(&self, id: i64) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM notes WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn delete_owned_notes(&self, owner_id: UserId, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;
        let mut deleted = 0;
        for id in ids {
            deleted += tx.execute(
                "DELETE FROM notes WHERE id = ?1 AND owner_id = ?2",
                params![id, owner_id],
            )?;
        }
        tx.commit()?;
        Ok(deleted)
    }

    // File operations

    fn create_file(&self, file: &NewFileItem) -> Result<FileItem> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO files (owner_id, folder_id, title, original_name, storage_path, mime_type, size_bytes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
            params![
                file.owner_id,
                file.folder_id,
                file.title,
                file.original_name,
                file.storage_path,
                file.mime_type,
                file.size_bytes,
                now(),
            ],
        )?;
        fetch_file(&conn, conn.last_insert_rowid())?.ok_or(Error::NotFound)
    }

    fn get_file(&self, id: i64) -> Result<Option<FileItem>> {
        fetch_file(&self.conn(), id)
    }

    fn list_files(&self, owner_id: UserId, query: &ItemQuery) -> Result<Page<FileItem>> {
        item_page(
            &self.conn(),
            "files",
            FILE_COLUMNS,
            owner_id,
            query,
            &["title", "original_name"],
            file_from_row,
        )
    }

    fn list_owned_files(&self, owner_id: UserId, ids: &[i64]) -> Result<Vec<FileItem>> {
        let conn = self.conn();
        let mut seen = HashSet::with_capacity(ids.len());
        let mut files = Vec::new();
        for &id in ids {
            if !seen.insert(id) {
                continue;
            }
            match fetch_file(&conn, id)? {
                Some(file) if file.owner_id == owner_id => files.push(file),
                _ => {}
            }
        }
        Ok(files)
    }

    fn update_file(&self, file: &FileItem) -> Result<()> {
        let updated = self.conn().execute(
            "UPDATE files SET folder_id = ?1, title = ?2, updated_at = ?3 WHERE id = ?4",
            params![file.folder_id, file.title, now(), file.id],
        )?;
        if updated == 0 {
            return Err(Error::NotFound);
        }
        Ok(())
    }

    fn delete_files(&self, ids: &[i64]) -> Result<Vec<DeletedFile>> {
        let mut conn = self.conn();
        let tx = immediate(&mut conn)?;

        let mut deleted = Vec::with_capacity(ids.len());
        for &id in ids {
            let Some(file) = fetch_file(&tx, id)? else {
                continue;
            };
            tx.execute("DELETE FROM files WHERE id = ?1", params![id])?;
            let remaining: i64 = tx.query_row(
                "SELECT COUNT(*) FROM files WHERE storage_path = ?1",
                params![file.storage_path],
                |row| row.get(0),
            )?;
            deleted.push(DeletedFile {
                blob_shared: remaining > 0,
                file,
            });
        }

        tx.commit()?;
        Ok(deleted)
    }

    fn owner_stats(&self, owner_id: UserId) -> Result<OwnerStats> {
        let conn = self.conn();
        let count = |table: &str| -> Result<i64> {
            conn.query_row(
                &format!("SELECT COUNT(*) FROM {table} WHERE owner_id = ?1"),
                params![owner_id],
                |row| row.get(0),
            )
            .map_err(Error::from)
        };

        Ok(OwnerStats {
            notes: count("notes")?,
            note_folders: count("note_folders")?,
            files: count("files")?,
            file_folders: count("file_folders")?,
            storage_bytes: conn.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM files WHERE owner_id = ?1",
                params![owner_id],
                |row| row.get(0),
            )?,
        })
    }

    // Session operations

    fn create_session(&self, session: &Session) -> Result<()> {
        let result = self.conn().execute(
            "INSERT INTO sessions (id, token_hash, token_lookup, user_id, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session.id,
                session.token_hash,
                session.token_lookup,
                session.user_id,
                format_datetime(&session.created_at),
                format_datetime(&session.expires_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY =>
            {
                Err(Error::TokenLookupCollision)
            }
            Err(e) => Err(Error::from(e)),
        }
    }

    fn get_session_by_lookup(&self, lookup: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        conn.query_row(
            &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE token_lookup = ?1"),
            params![lookup],
            session_from_row,
        )
        .optional()
        .map_err(Error::from)
    }

    fn delete_session(&self, id: &str) -> Result<bool> {
        let deleted = self
            .conn()
            .execute("DELETE FROM sessions WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    fn update_session_last_used(&self, id: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE sessions SET last_used_at = ?1 WHERE id = ?2",
            params![now(), id],
        )?;
        Ok(())
    }
}
