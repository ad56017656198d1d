use sea_orm::entity::prelude::*;

/// One row per (client_address, sender, recipient) triple ever observed.
///
/// `first_seen` is written once at creation and never updated; the cooldown
/// is always measured against it. `client_name` is stored for the audit
/// trail but is not part of the lookup key.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "greylist")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub client_address: String,
    pub client_name: String,
    pub sender: String,
    pub recipient: String,
    pub first_seen: DateTimeUtc,
    pub seen_count: i64,
    pub accepted_count: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
