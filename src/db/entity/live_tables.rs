use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "live_tables")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub lobby_no: i32,
    #[sea_orm(unique)]
    pub table_no: String,
    pub game_type: i16,
    pub countdown_secs: i32,
    pub current_shoe: i64,
    pub maintain: bool,
    pub dealer_id: Option<i64>,
    pub dealer_name: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
