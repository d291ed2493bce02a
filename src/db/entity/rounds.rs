use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rounds")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub table_id: i64,
    pub lobby_no: i32,
    pub table_no: String,
    pub game_type: i16,
    pub shoe_no: i64,
    pub round_no: i32,
    pub round_sn: String,
    pub dealer: Option<String>,
    pub status: i16,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub result: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub details: Option<Json>,
    pub start_time: DateTimeUtc,
    pub end_time: DateTimeUtc,
    pub settle_time: Option<DateTimeUtc>,
    pub resettle_count: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
