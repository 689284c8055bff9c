use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "stream_stats")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub stream_id: i64,
    pub probe_status: String,
    pub resolution: Option<String>,
    pub bitrate: Option<i64>,
    pub video_bitrate: Option<i64>,
    pub fps: Option<f64>,
    pub audio_channels: Option<i32>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub is_black_screen: Option<bool>,
    pub consecutive_failures: i32,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub last_probed_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
