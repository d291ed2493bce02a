use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "bet_orders")]
pub struct Model {
    /// Same id as the temp order this row was folded from.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,
    pub round_id: i64,
    pub table_id: i64,
    pub user_id: i64,
    pub game_type: i16,
    pub round_sn: String,
    #[sea_orm(column_type = "JsonBinary")]
    pub bet: Json,
    #[sea_orm(column_type = "Decimal(Some((20, 4)))")]
    pub bet_amount: Decimal,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((20, 4)))")]
    pub rolling: Decimal,
    #[sea_orm(column_type = "Decimal(Some((10, 4)))")]
    pub comm: Decimal,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub round_result: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub round_details: Option<Json>,
    #[sea_orm(column_type = "Decimal(Some((20, 4)))")]
    pub settle_result: Decimal,
    pub status: i16,
    pub resettle_count: i32,
    pub bet_time: DateTimeUtc,
    pub settle_time: DateTimeUtc,
    pub user_type: i16,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
