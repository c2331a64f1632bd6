//! Database models and domain types.

use chrono::NaiveDateTime;
use derive_getters::Getters;
use derive_new::new;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::schema;

/// Per-user token account.
///
/// The balance is only ever mutated through [`AccountLedger`] debit/credit,
/// never read-modify-written by callers.
///
/// [`AccountLedger`]: crate::db::AccountLedger
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters, Serialize, Deserialize)]
#[diesel(table_name = schema::accounts)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    id: String,
    tokens: i32,
    created_at: NaiveDateTime,
}

/// Insertable account model for lazy account creation.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::accounts)]
pub struct NewAccount {
    id: String,
    tokens: i32,
}

/// A game record. Created exactly once, when its first version is persisted.
#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Getters, Serialize, Deserialize)]
#[diesel(table_name = schema::games)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    id: String,
    owner_id: Option<String>,
    created_at: NaiveDateTime,
}

/// Insertable game model.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::games)]
pub struct NewGame {
    id: String,
    owner_id: Option<String>,
}

/// One immutable snapshot of a game's generated artifact, tied to the prompt
/// that produced it. Versions are append-only; each holds the complete
/// artifact rather than a diff.
#[derive(
    Debug, Clone, Queryable, Identifiable, Associations, Selectable, Getters, Serialize, Deserialize,
)]
#[diesel(table_name = schema::versions)]
#[diesel(belongs_to(Game))]
#[serde(rename_all = "camelCase")]
pub struct Version {
    id: String,
    game_id: String,
    prompt: String,
    code: String,
    created_at: NaiveDateTime,
}

/// Insertable version model.
#[derive(Debug, Clone, Insertable, new)]
#[diesel(table_name = schema::versions)]
pub struct NewVersion {
    id: String,
    game_id: String,
    prompt: String,
    code: String,
}
