use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "user_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_id: i64,
    pub stats_date: Date,
    #[sea_orm(column_type = "Decimal(Some((20, 4)))")]
    pub today_rolling: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 4)))")]
    pub total_rolling: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 4)))")]
    pub today_win_lose: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 4)))")]
    pub total_win_lose: Decimal,
    pub win_streak: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
