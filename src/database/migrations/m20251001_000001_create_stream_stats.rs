//! Create the stream_stats table
//!
//! One row per remote stream id, overwritten on every probe.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(StreamStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(StreamStats::StreamId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(StreamStats::ProbeStatus).string().not_null())
                    .col(ColumnDef::new(StreamStats::Resolution).string().null())
                    .col(ColumnDef::new(StreamStats::Bitrate).big_integer().null())
                    .col(ColumnDef::new(StreamStats::VideoBitrate).big_integer().null())
                    .col(ColumnDef::new(StreamStats::Fps).double().null())
                    .col(ColumnDef::new(StreamStats::AudioChannels).integer().null())
                    .col(ColumnDef::new(StreamStats::VideoCodec).string().null())
                    .col(ColumnDef::new(StreamStats::AudioCodec).string().null())
                    .col(ColumnDef::new(StreamStats::IsBlackScreen).boolean().null())
                    .col(
                        ColumnDef::new(StreamStats::ConsecutiveFailures)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(StreamStats::LastError).text().null())
                    .col(
                        ColumnDef::new(StreamStats::LastProbedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stream_stats_probe_status")
                    .table(StreamStats::Table)
                    .col(StreamStats::ProbeStatus)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_stream_stats_consecutive_failures")
                    .table(StreamStats::Table)
                    .col(StreamStats::ConsecutiveFailures)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(StreamStats::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum StreamStats {
    Table,
    StreamId,
    ProbeStatus,
    Resolution,
    Bitrate,
    VideoBitrate,
    Fps,
    AudioChannels,
    VideoCodec,
    AudioCodec,
    IsBlackScreen,
    ConsecutiveFailures,
    LastError,
    LastProbedAt,
}
