use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "temp_bet_orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub round_id: i64,
    pub table_id: i64,
    pub user_id: i64,
    #[sea_orm(column_type = "JsonBinary")]
    pub bet: Json,
    #[sea_orm(column_type = "Decimal(Some((20, 4)))")]
    pub bet_amount: Decimal,
    pub currency: String,
    pub bet_time: DateTimeUtc,
    pub source: Option<String>,
    pub ip: Option<String>,
    pub user_type: i16,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
