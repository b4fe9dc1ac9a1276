use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "subtitles")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub filename: String,
    pub hash: String,
    pub language: String,
    pub hearing_impaired: bool,
    pub score: i64,
    pub format: String,
    pub video_file: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
