use crate::csv_codec::{decode_records, encode_records, export_file_name};
use crate::db::Database;
use crate::errors::{AppError, AppResult};
use crate::models::{
    AppSettings, ClientRecord, DeskSummary, ExportResponse, ImportReport, SaveClientPayload, SaveOutcome,
    StatusFilter,
};
use crate::snapshot::{Snapshot, ViewState};
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Asynchronous facade over the record store plus the desk workflows built on it.
#[derive(Clone)]
pub struct DeskCore {
    db: Arc<Database>,
    app_data_dir: PathBuf,
}

impl DeskCore {
    pub fn new(app_data_dir: PathBuf) -> AppResult<Arc<Self>> {
        let db_path = app_data_dir.join("state.sqlite");
        let db = Arc::new(Database::new(&db_path)?);

        if let Some(backup) = db.migration_backup() {
            tracing::warn!(backup = %backup.display(), "stored clients were reset by a schema upgrade");
        }

        Ok(Arc::new(Self { db, app_data_dir }))
    }

    pub fn data_dir(&self) -> &Path {
        &self.app_data_dir
    }

    pub fn migration_backup(&self) -> Option<&Path> {
        self.db.migration_backup()
    }

    async fn with_db<T, F>(&self, op: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> AppResult<T> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db)).await?
    }

    pub async fn get(&self, account_id: &str) -> AppResult<Option<ClientRecord>> {
        let account_id = account_id.to_string();
        self.with_db(move |db| db.get_client(&account_id)).await
    }

    pub async fn put(&self, record: ClientRecord, now: DateTime<Utc>) -> AppResult<()> {
        self.with_db(move |db| db.put_client(&record, now)).await
    }

    pub async fn delete(&self, account_id: &str, now: DateTime<Utc>) -> AppResult<bool> {
        let key = account_id.to_string();
        let removed = self.with_db(move |db| db.delete_client(&key, now)).await?;
        tracing::info!(account_id = %account_id, removed, "client deleted");
        Ok(removed)
    }

    pub async fn list_all(&self) -> AppResult<Vec<ClientRecord>> {
        self.with_db(|db| db.list_clients()).await
    }

    pub async fn last_write_timestamp(&self) -> AppResult<Option<DateTime<Utc>>> {
        self.with_db(|db| db.last_write_timestamp()).await
    }

    pub async fn get_settings(&self) -> AppResult<AppSettings> {
        self.with_db(|db| db.get_settings()).await
    }

    pub async fn update_settings(&self, update: serde_json::Value) -> AppResult<AppSettings> {
        self.with_db(move |db| db.update_settings(update)).await
    }

    /// Form submission: validate, derive the stored fields, then write.
    pub async fn save_client(&self, payload: SaveClientPayload, now: DateTime<Utc>) -> AppResult<SaveOutcome> {
        let record = build_record(payload, now)?;
        let created = self.get(&record.account_id).await?.is_none();
        self.put(record.clone(), now).await?;

        tracing::info!(
            account_id = %record.account_id,
            status = record.status.as_str(),
            created,
            "client saved"
        );
        Ok(SaveOutcome { record, created })
    }

    pub async fn load_snapshot(&self, now: DateTime<Utc>) -> AppResult<Snapshot> {
        Ok(Snapshot::new(self.list_all().await?, now))
    }

    pub async fn load_view(
        &self,
        now: DateTime<Utc>,
        status_filter: StatusFilter,
        search: &str,
    ) -> AppResult<ViewState> {
        let snapshot = self.load_snapshot(now).await?;
        Ok(ViewState::with_filter(snapshot, status_filter, search))
    }

    pub async fn summary(&self, now: DateTime<Utc>) -> AppResult<DeskSummary> {
        let snapshot = self.load_snapshot(now).await?;
        let last_write = self.last_write_timestamp().await?;
        let settings = self.get_settings().await?;
        Ok(snapshot.summary(last_write, &settings))
    }

    pub async fn import_csv(&self, path: &Path, now: DateTime<Utc>) -> AppResult<ImportReport> {
        let bytes = tokio::fs::read(path).await?;
        let text = String::from_utf8_lossy(&bytes);
        if matches!(text, Cow::Owned(_)) {
            tracing::warn!(path = %path.display(), "csv contains invalid utf-8; bad bytes replaced");
        }
        tracing::info!(path = %path.display(), "importing csv");
        self.import_csv_text(&text, now).await
    }

    /// Writes each decoded record on its own; a failed write is counted and the batch continues.
    pub async fn import_csv_text(&self, text: &str, now: DateTime<Utc>) -> AppResult<ImportReport> {
        let records = decode_records(text, now);
        let mut report = ImportReport {
            decoded: records.len(),
            ..ImportReport::default()
        };

        for record in records {
            let account_id = record.account_id.clone();
            match self.put(record, now).await {
                Ok(()) => report.succeeded += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(account_id = %account_id, error = %error, "failed to import client");
                }
            }
        }

        tracing::info!(
            decoded = report.decoded,
            succeeded = report.succeeded,
            failed = report.failed,
            "csv import finished"
        );
        Ok(report)
    }

    pub async fn export_master(&self, out_dir: Option<&Path>, now: DateTime<Utc>) -> AppResult<ExportResponse> {
        let records = self.list_all().await?;
        let settings = self.get_settings().await?;
        self.write_export(&settings.master_export_prefix, &records, out_dir, now)
            .await
    }

    /// Exports exactly what the view currently displays.
    pub async fn export_filtered(
        &self,
        view: &ViewState,
        out_dir: Option<&Path>,
        now: DateTime<Utc>,
    ) -> AppResult<ExportResponse> {
        let settings = self.get_settings().await?;
        self.write_export(&settings.filtered_export_prefix, view.displayed(), out_dir, now)
            .await
    }

    async fn write_export(
        &self,
        prefix: &str,
        records: &[ClientRecord],
        out_dir: Option<&Path>,
        now: DateTime<Utc>,
    ) -> AppResult<ExportResponse> {
        if records.is_empty() {
            return Err(AppError::NotFound("No clients to export".to_string()));
        }

        let export_dir = out_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.app_data_dir.join("exports"));
        tokio::fs::create_dir_all(&export_dir).await?;

        let file_name = export_file_name(&sanitize_filename_component(prefix), now.date_naive());
        let output_path = export_dir.join(file_name);
        if !output_path.starts_with(&export_dir) {
            return Err(AppError::Io("Resolved export path escaped export directory".to_string()));
        }

        tokio::fs::write(&output_path, encode_records(records)).await?;
        tracing::info!(path = %output_path.display(), count = records.len(), "csv export written");

        Ok(ExportResponse {
            path: output_path.to_string_lossy().to_string(),
            count: records.len(),
        })
    }
}

fn build_record(payload: SaveClientPayload, now: DateTime<Utc>) -> AppResult<ClientRecord> {
    payload.validate()?;

    Ok(ClientRecord {
        account_id: payload.account_id.trim().to_string(),
        client_name: payload.client_name.trim().to_string(),
        total_cameras: payload.total_cameras,
        cameras_ok: payload.cameras_ok,
        status: payload.status,
        billing: payload.billing,
        notes: payload.notes,
        last_updated: now,
        needs_follow_up: payload.status.requires_follow_up(),
    })
}

fn sanitize_filename_component(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let candidate: String = out.trim_matches('_').chars().take(120).collect();
    if candidate.is_empty() {
        "export".to_string()
    } else {
        candidate
    }
}

#[cfg(test)]
mod tests {
    use super::{sanitize_filename_component, DeskCore};
    use crate::errors::AppError;
    use crate::models::{ClientStatus, Freshness, SaveClientPayload, StatusFilter};
    use chrono::{Duration, TimeZone, Utc};

    fn payload(account_id: &str, status: ClientStatus) -> SaveClientPayload {
        SaveClientPayload {
            account_id: account_id.to_string(),
            client_name: "Condomínio Jardim".to_string(),
            total_cameras: 10,
            cameras_ok: 7,
            status,
            billing: false,
            notes: "DVR reiniciado".to_string(),
        }
    }

    #[tokio::test]
    async fn save_reports_create_then_update() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = DeskCore::new(dir.path().to_path_buf()).expect("desk");
        let now = Utc::now();

        let first = desk
            .save_client(payload(" 2020 ", ClientStatus::Partial), now)
            .await
            .expect("create");
        assert!(first.created);
        assert_eq!(first.record.account_id, "2020");
        assert!(first.record.needs_follow_up);
        assert_eq!(first.record.last_updated, now);

        let second = desk
            .save_client(payload("2020", ClientStatus::Ok), now + Duration::minutes(5))
            .await
            .expect("update");
        assert!(!second.created);
        assert!(!second.record.needs_follow_up);

        let stored = desk.get("2020").await.expect("get").expect("exists");
        assert_eq!(stored, second.record);
        assert_eq!(desk.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn more_working_than_total_cameras_is_rejected_before_storage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = DeskCore::new(dir.path().to_path_buf()).expect("desk");

        let mut invalid = payload("77", ClientStatus::Ok);
        invalid.cameras_ok = 11;
        let result = desk.save_client(invalid, Utc::now()).await;

        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(desk.get("77").await.expect("get").is_none());
        assert!(desk.last_write_timestamp().await.expect("marker").is_none());
    }

    #[tokio::test]
    async fn blank_identity_fields_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = DeskCore::new(dir.path().to_path_buf()).expect("desk");

        let blank_account = desk.save_client(payload("   ", ClientStatus::Ok), Utc::now()).await;
        assert!(matches!(blank_account, Err(AppError::Validation(_))));

        let mut blank_name = payload("1", ClientStatus::Ok);
        blank_name.client_name = String::new();
        let result = desk.save_client(blank_name, Utc::now()).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn import_persists_decoded_rows_and_keeps_file_dates() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = DeskCore::new(dir.path().to_path_buf()).expect("desk");
        desk.save_client(payload("1", ClientStatus::Ok), Utc::now())
            .await
            .expect("seed");

        let csv = "CONTA;NOME_CLIENTE;STATUS;CAMERAS_OK;TOTAL_CAMERAS;COBRANCA_OS;ULTIMA_ATUALIZACAO;OBSERVACOES\n\
                   \"1\";\"Overwritten\";Inativa;0;4;SIM;2023-06-01T12:00:00Z;\"sem sinal\"\n\
                   \"2\";\"Novo\";OK;2;2;NÃO;2023-06-01T13:00:00Z;\"\"\n";
        let report = desk
            .import_csv_text(csv, Utc::now())
            .await
            .expect("import");

        assert_eq!(report.decoded, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);

        let overwritten = desk.get("1").await.expect("get").expect("exists");
        assert_eq!(overwritten.client_name, "Overwritten");
        assert_eq!(overwritten.status, ClientStatus::Inactive);
        assert_eq!(
            overwritten.last_updated,
            Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).single().expect("time")
        );
        assert_eq!(desk.list_all().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn exports_write_prefixed_files_and_refuse_empty_sets() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = DeskCore::new(dir.path().to_path_buf()).expect("desk");
        let now = Utc.with_ymd_and_hms(2024, 7, 3, 10, 0, 0).single().expect("time");

        let empty = desk.export_master(None, now).await;
        assert!(matches!(empty, Err(AppError::NotFound(_))));

        desk.save_client(payload("1", ClientStatus::Partial), now)
            .await
            .expect("save");
        desk.save_client(payload("2", ClientStatus::Ok), now)
            .await
            .expect("save");

        let master = desk.export_master(None, now).await.expect("master export");
        assert_eq!(master.count, 2);
        assert!(master.path.ends_with("VideoAlerta_Plantao_MASTER_2024-07-03.csv"));
        let written = std::fs::read_to_string(&master.path).expect("read export");
        assert_eq!(written.lines().count(), 3);

        let view = desk
            .load_view(now, StatusFilter::NeedsFollowUp, "")
            .await
            .expect("view");
        let out_dir = dir.path().join("elsewhere");
        let filtered = desk
            .export_filtered(&view, Some(&out_dir), now)
            .await
            .expect("filtered export");
        assert_eq!(filtered.count, 1);
        assert!(filtered.path.ends_with("VideoAlerta_Busca_2024-07-03.csv"));
        assert!(out_dir.join("VideoAlerta_Busca_2024-07-03.csv").is_file());
    }

    #[tokio::test]
    async fn summary_reflects_store_state() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = DeskCore::new(dir.path().to_path_buf()).expect("desk");
        let now = Utc::now();

        let before = desk.summary(now).await.expect("summary");
        assert_eq!(before.total, 0);
        assert!(before.last_write.is_none());
        assert!(before.freshness.is_none());

        desk.save_client(payload("1", ClientStatus::NoImage), now)
            .await
            .expect("save");
        let after = desk.summary(Utc::now()).await.expect("summary");
        assert_eq!(after.total, 1);
        assert_eq!(after.follow_up, 1);
        assert_eq!(after.updated_this_shift, 1);
        assert!(after.last_write.is_some());
    }

    #[tokio::test]
    async fn freshness_follows_the_injected_write_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = DeskCore::new(dir.path().to_path_buf()).expect("desk");
        let saved_at = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).single().expect("time");

        desk.save_client(payload("9", ClientStatus::Ok), saved_at)
            .await
            .expect("save");
        assert_eq!(desk.last_write_timestamp().await.expect("marker"), Some(saved_at));

        let soon = desk.summary(saved_at + Duration::minutes(20)).await.expect("summary");
        assert_eq!(soon.freshness, Some(Freshness::Fresh));
        let later = desk.summary(saved_at + Duration::hours(13)).await.expect("summary");
        assert_eq!(later.last_write, Some(saved_at));
        assert_eq!(later.freshness, Some(Freshness::Stale));

        let deleted_at = saved_at + Duration::hours(14);
        desk.delete("9", deleted_at).await.expect("delete");
        assert_eq!(desk.last_write_timestamp().await.expect("marker"), Some(deleted_at));
    }

    #[tokio::test]
    async fn invalid_utf8_in_one_row_does_not_abort_the_import() {
        let dir = tempfile::tempdir().expect("tempdir");
        let desk = DeskCore::new(dir.path().join("data")).expect("desk");
        let path = dir.path().join("cp1252.csv");

        let mut bytes = b"CONTA;NOME_CLIENTE;STATUS;CAMERAS_OK;TOTAL_CAMERAS;COBRANCA_OS;ULTIMA_ATUALIZACAO;OBSERVACOES\n".to_vec();
        bytes.extend_from_slice(b"\"1\";\"Loja Um\";OK;1;1;N\xC3O;2024-01-01;\"n\"\n");
        bytes.extend_from_slice(b"\"2\";\"Loja Dois\";Parcial;1;2;SIM;2024-01-01;\"m\"\n");
        std::fs::write(&path, bytes).expect("write csv");

        let report = desk.import_csv(&path, Utc::now()).await.expect("import");
        assert_eq!(report.decoded, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);

        let first = desk.get("1").await.expect("get").expect("exists");
        assert!(!first.billing);
        assert!(desk.get("2").await.expect("get").expect("exists").billing);
    }

    #[test]
    fn export_prefix_is_made_filename_safe() {
        assert_eq!(sanitize_filename_component("../Plantão Noite"), "Plant_o_Noite");
        assert_eq!(sanitize_filename_component("///"), "export");
    }
}
