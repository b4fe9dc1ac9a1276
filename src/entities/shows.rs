use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "shows")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub external_id: i64,
    pub kind: String,
    pub title: String,
    pub year: i32,
    pub other_titles: String, // JSON object stored as string
    pub duration_secs: i64,
    pub plot: String,
    pub plot_medium: String,
    pub plot_long: String,
    pub poster_url: String,
    pub rating: f32,
    pub votes: i64,
    pub languages: String, // JSON array stored as string
    pub release_date: Option<String>,
    pub tagline: String,
    pub season: Option<i32>,
    pub episode: Option<i32>,
    pub series_id: Option<i64>,
    pub status: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
