use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE TYPE court_recorder.recording_status AS ENUM (
                    'pending',
                    'requesting_chunks',
                    'polling',
                    'downloading',
                    'consolidating',
                    'uploading',
                    'completed',
                    'failed'
                )",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE TYPE court_recorder.chunk_status AS ENUM (
                    'requested',
                    'ready',
                    'downloaded',
                    'failed'
                )",
            )
            .await?;

        let create_recordings_sql = r#"
            CREATE TABLE IF NOT EXISTS court_recorder.recordings (
                id BIGSERIAL PRIMARY KEY,
                external_id UUID NOT NULL UNIQUE,
                facility_id BIGINT NOT NULL,
                court_id BIGINT NOT NULL,
                booking_id BIGINT,
                user_id BIGINT,
                start_time TIMESTAMPTZ NOT NULL,
                end_time TIMESTAMPTZ NOT NULL,
                status court_recorder.recording_status NOT NULL DEFAULT 'pending',
                failed_stage court_recorder.recording_status,
                total_chunks INTEGER NOT NULL DEFAULT 0,
                fetched_chunks INTEGER NOT NULL DEFAULT 0,
                consolidated_chunks INTEGER NOT NULL DEFAULT 0,
                total_duration_seconds BIGINT,
                total_file_size_bytes BIGINT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 5,
                error_message TEXT,
                consolidated_storage_key TEXT,
                consolidated_storage_bucket TEXT,
                is_manual_recording BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                consolidation_started_at TIMESTAMPTZ,
                consolidation_completed_at TIMESTAMPTZ,
                archived_at TIMESTAMPTZ,
                last_retry_at TIMESTAMPTZ,
                notification_sent_at TIMESTAMPTZ,

                CONSTRAINT recordings_window_ordered CHECK (end_time > start_time),
                CONSTRAINT recordings_fetched_within_total CHECK (fetched_chunks <= total_chunks)
            )
        "#;

        manager
            .get_connection()
            .execute_unprepared(create_recordings_sql)
            .await?;

        let create_chunks_sql = r#"
            CREATE TABLE IF NOT EXISTS court_recorder.recording_chunks (
                id BIGSERIAL PRIMARY KEY,
                recording_id BIGINT NOT NULL
                    REFERENCES court_recorder.recordings(id) ON DELETE CASCADE,
                chunk_number INTEGER NOT NULL,
                task_id VARCHAR(255),
                status court_recorder.chunk_status NOT NULL DEFAULT 'requested',
                start_time TIMESTAMPTZ NOT NULL,
                end_time TIMESTAMPTZ NOT NULL,
                local_path TEXT,
                file_size_bytes BIGINT,
                failure_reason TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),

                CONSTRAINT recording_chunks_number_unique UNIQUE(recording_id, chunk_number)
            )
        "#;

        manager
            .get_connection()
            .execute_unprepared(create_chunks_sql)
            .await?;

        // Resume-on-start and the periodic scan look up unfinished recordings by status
        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_recordings_status
                    ON court_recorder.recordings(status)",
            )
            .await?;

        manager
            .get_connection()
            .execute_unprepared(
                "CREATE INDEX IF NOT EXISTS idx_recordings_court_created
                    ON court_recorder.recordings(court_id, created_at DESC)",
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS court_recorder.recording_chunks")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS court_recorder.recordings")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TYPE IF EXISTS court_recorder.chunk_status")
            .await?;

        manager
            .get_connection()
            .execute_unprepared("DROP TYPE IF EXISTS court_recorder.recording_status")
            .await?;

        Ok(())
    }
}
