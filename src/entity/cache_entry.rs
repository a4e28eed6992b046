//! Backing table of [`DatabaseCache`](crate::cache::DatabaseCache).

use sea_orm::entity::prelude::*;

/// Sea-ORM entity model for cache entries.
///
/// | Column      | Type                    | Description                             |
/// |-------------|-------------------------|-----------------------------------------|
/// | key         | TEXT (Primary Key)      | Cache key                               |
/// | data        | BYTEA                   | MessagePack serialized value            |
/// | expiry_date | TIMESTAMPTZ             | Time after which the entry is ignored   |
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "cache_entries")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false, column_type = "Text")]
    pub key: String,
    pub data: Vec<u8>,
    #[sea_orm(indexed)]
    pub expiry_date: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
