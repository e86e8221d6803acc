use std::str::FromStr;

use rusqlite::{params, Connection};

use crate::db::DatabaseError;
use crate::models::{Role, UserProfile};

pub fn upsert_user(conn: &Connection, profile: &UserProfile) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO users (user_id, display_name, avatar_ref, role) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(user_id) DO UPDATE SET
            display_name = excluded.display_name,
            avatar_ref = excluded.avatar_ref,
            role = excluded.role",
        params![
            profile.user_id,
            profile.display_name,
            profile.avatar_ref,
            profile.role.as_str(),
        ],
    )?;
    Ok(())
}

pub fn get_user(conn: &Connection, user_id: &str) -> Result<Option<UserProfile>, DatabaseError> {
    let result = conn.query_row(
        "SELECT user_id, display_name, avatar_ref, role FROM users WHERE user_id = ?1",
        params![user_id],
        |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, String>(3)?,
            ))
        },
    );

    match result {
        Ok((user_id, display_name, avatar_ref, role)) => Ok(Some(UserProfile {
            user_id,
            display_name,
            avatar_ref,
            role: Role::from_str(&role)?,
        })),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}
