//! Drives a sales file through the conversion service until every product
//! code resolves to an account.
//!
//! One [`Reconciler`] owns one file-processing session: the latest
//! [`ConversionRun`], the operator's pending corrections and the workflow
//! phase. Submissions are tagged with a generation counter so a response
//! that belongs to an abandoned file can never repopulate the state.

use async_trait::async_trait;
use futures::future::join_all;
use thiserror::Error;

use crate::api::conversion::{self, ConversionParameters, ConversionRun, SourceFile};
use crate::api::{mappings, ApiClient, ApiError};

/// The two remote operations the workflow needs. [`ApiClient`] is the real
/// implementation; the tests drive the state machine against an in-memory
/// service.
#[async_trait]
pub trait ConversionBackend {
    async fn convert(
        &self,
        file: &SourceFile,
        params: &ConversionParameters,
    ) -> Result<ConversionRun, ApiError>;

    async fn create_mapping(&self, product_code: &str, account_code: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl ConversionBackend for ApiClient {
    async fn convert(
        &self,
        file: &SourceFile,
        params: &ConversionParameters,
    ) -> Result<ConversionRun, ApiError> {
        conversion::submit(self, file, params).await
    }

    async fn create_mapping(&self, product_code: &str, account_code: &str) -> Result<(), ApiError> {
        mappings::create_product_mapping(self, product_code, account_code)
            .await
            .map(|_| ())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    FileSelected,
    Submitting,
    NeedsReconciliation,
    Saving,
    Resubmitting,
    Converged,
    Failed,
}

/// One row the operator still has to fill in. The list mirrors the
/// `unmapped_codes` of the latest run, minus rows the operator removed.
/// Rows are addressed by product code, never by position: the service does
/// not promise a stable order across runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCorrection {
    pub product_code: String,
    pub account_code: String,
}

impl PendingCorrection {
    fn is_blank(&self) -> bool {
        self.account_code.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowOutcome {
    Saved,
    /// Someone else mapped this code first; the existing mapping serves the
    /// next run just as well.
    AlreadyMapped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowResult {
    pub product_code: String,
    pub outcome: RowOutcome,
}

/// What actually happened to each row of a save batch. The workflow never
/// assumes more than this report states: rows that failed may or may not
/// have reached the server, and nothing is rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub rows: Vec<RowResult>,
}

impl BatchReport {
    pub fn saved(&self) -> usize {
        self.count(|outcome| matches!(outcome, RowOutcome::Saved))
    }

    pub fn already_mapped(&self) -> usize {
        self.count(|outcome| matches!(outcome, RowOutcome::AlreadyMapped))
    }

    pub fn failed(&self) -> usize {
        self.count(|outcome| matches!(outcome, RowOutcome::Failed(_)))
    }

    /// Rows that now have a mapping on the server, whoever created it.
    pub fn persisted(&self) -> usize {
        self.saved() + self.already_mapped()
    }

    pub fn all_failed(&self) -> bool {
        !self.rows.is_empty() && self.failed() == self.rows.len()
    }

    fn count(&self, pred: impl Fn(&RowOutcome) -> bool) -> usize {
        self.rows.iter().filter(|row| pred(&row.outcome)).count()
    }
}

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("no sales file selected")]
    NoFileSelected,

    #[error("invalid parameters: {}", .0.join("; "))]
    InvalidParameters(Vec<String>),

    #[error("{0} correction(s) are missing an account code")]
    IncompleteCorrections(usize),

    #[error("there are no pending corrections to save")]
    NothingToSave,

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub struct Reconciler<B: ConversionBackend> {
    backend: B,
    phase: Phase,
    file: Option<SourceFile>,
    params: Option<ConversionParameters>,
    generation: u64,
    run: Option<ConversionRun>,
    pending: Vec<PendingCorrection>,
}

impl<B: ConversionBackend> Reconciler<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            phase: Phase::Idle,
            file: None,
            params: None,
            generation: 0,
            run: None,
            pending: Vec::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn run(&self) -> Option<&ConversionRun> {
        self.run.as_ref()
    }

    pub fn pending(&self) -> &[PendingCorrection] {
        &self.pending
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn incomplete_corrections(&self) -> usize {
        self.pending.iter().filter(|row| row.is_blank()).count()
    }

    /// Selecting a file resets the whole workflow. The generation bump
    /// invalidates any submission still in flight for the previous file.
    pub fn select_file(&mut self, file: SourceFile, params: ConversionParameters) {
        self.generation += 1;
        self.file = Some(file);
        self.params = Some(params);
        self.run = None;
        self.pending.clear();
        self.phase = Phase::FileSelected;
    }

    pub async fn submit(&mut self) -> Result<(), WorkflowError> {
        self.run_conversion(Phase::Submitting).await
    }

    /// Re-run the conversion with the same file and parameters, normally
    /// right after corrections were saved.
    pub async fn resubmit(&mut self) -> Result<(), WorkflowError> {
        self.run_conversion(Phase::Resubmitting).await
    }

    async fn run_conversion(&mut self, phase: Phase) -> Result<(), WorkflowError> {
        // Reject bad input before touching the phase or the network; the
        // workflow stays where it was.
        match (&self.file, &self.params) {
            (Some(_), Some(params)) => params
                .validate()
                .map_err(WorkflowError::InvalidParameters)?,
            _ => return Err(WorkflowError::NoFileSelected),
        }

        let generation = self.generation;
        self.phase = phase;
        let (Some(file), Some(params)) = (&self.file, &self.params) else {
            return Err(WorkflowError::NoFileSelected);
        };
        match self.backend.convert(file, params).await {
            Ok(run) => {
                self.apply_run(generation, run);
                Ok(())
            }
            Err(err) => {
                self.phase = Phase::Failed;
                Err(err.into())
            }
        }
    }

    /// Apply a conversion result. Returns false, changing nothing, when the
    /// result belongs to a submission that predates the current file
    /// selection.
    pub fn apply_run(&mut self, generation: u64, run: ConversionRun) -> bool {
        if generation != self.generation {
            log::info!(
                "Discarding conversion result of run {} for an abandoned file",
                run.run_id
            );
            return false;
        }
        self.pending = run
            .unmapped_codes
            .iter()
            .map(|code| PendingCorrection {
                product_code: code.clone(),
                account_code: String::new(),
            })
            .collect();
        self.phase = if run.is_converged() {
            Phase::Converged
        } else {
            Phase::NeedsReconciliation
        };
        self.run = Some(run);
        true
    }

    /// Record the operator's account code for one pending row. Purely local.
    pub fn set_account_code(&mut self, product_code: &str, account_code: &str) -> bool {
        match self
            .pending
            .iter_mut()
            .find(|row| row.product_code == product_code)
        {
            Some(row) => {
                row.account_code = account_code.trim().to_string();
                true
            }
            None => false,
        }
    }

    /// Opt a code out of this save batch. It shows up again on the next
    /// submission if it is still unmapped.
    pub fn remove_correction(&mut self, product_code: &str) -> bool {
        let before = self.pending.len();
        self.pending.retain(|row| row.product_code != product_code);
        self.pending.len() != before
    }

    /// Persist every pending correction. All creates are dispatched before
    /// any response is awaited; the report states per row what happened and
    /// a conflict counts as persisted. When every row fails the phase drops
    /// to Failed but the rows stay, so the operator can retry the batch.
    pub async fn save_corrections(&mut self) -> Result<BatchReport, WorkflowError> {
        match self.phase {
            Phase::NeedsReconciliation => {}
            // A fully failed batch left the rows in place for a retry.
            Phase::Failed if !self.pending.is_empty() => {}
            _ => return Err(WorkflowError::NothingToSave),
        }
        if self.pending.is_empty() {
            return Err(WorkflowError::NothingToSave);
        }
        let incomplete = self.incomplete_corrections();
        if incomplete > 0 {
            return Err(WorkflowError::IncompleteCorrections(incomplete));
        }

        self.phase = Phase::Saving;
        log::info!("Saving {} mapping(s)...", self.pending.len());
        let creates = self.pending.iter().map(|row| {
            let backend = &self.backend;
            async move {
                let outcome = match backend
                    .create_mapping(&row.product_code, &row.account_code)
                    .await
                {
                    Ok(()) => RowOutcome::Saved,
                    Err(ApiError::Conflict(_)) => RowOutcome::AlreadyMapped,
                    Err(err) => RowOutcome::Failed(err.to_string()),
                };
                RowResult {
                    product_code: row.product_code.clone(),
                    outcome,
                }
            }
        });
        let report = BatchReport {
            rows: join_all(creates).await,
        };
        log::info!(
            "Saving mappings...done ({} saved, {} already mapped, {} failed)",
            report.saved(),
            report.already_mapped(),
            report.failed()
        );

        self.phase = if report.all_failed() {
            Phase::Failed
        } else {
            Phase::NeedsReconciliation
        };
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;

    use common_macros::hash_map;

    use super::*;

    /// In-memory stand-in for the conversion service. The file's product
    /// codes are fixed; a conversion reports as unmapped whatever has no
    /// mapping yet, and creates can be forced to fail per product code.
    struct FakeService {
        file_codes: Vec<&'static str>,
        records_processed: u64,
        mapped: Mutex<HashMap<String, String>>,
        failing_creates: Mutex<HashSet<String>>,
        convert_calls: Mutex<u64>,
        create_calls: Mutex<Vec<String>>,
    }

    impl FakeService {
        fn new(file_codes: Vec<&'static str>, records_processed: u64) -> Self {
            Self {
                file_codes,
                records_processed,
                mapped: Mutex::new(HashMap::new()),
                failing_creates: Mutex::new(HashSet::new()),
                convert_calls: Mutex::new(0),
                create_calls: Mutex::new(Vec::new()),
            }
        }

        fn add_mapping(&self, product_code: &str, account_code: &str) {
            self.mapped
                .lock()
                .unwrap()
                .insert(product_code.to_string(), account_code.to_string());
        }

        fn fail_creates_for(&self, product_codes: &[&str]) {
            let mut failing = self.failing_creates.lock().unwrap();
            failing.clear();
            failing.extend(product_codes.iter().map(|code| code.to_string()));
        }

        fn convert_calls(&self) -> u64 {
            *self.convert_calls.lock().unwrap()
        }

        fn create_calls(&self) -> Vec<String> {
            self.create_calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConversionBackend for &FakeService {
        async fn convert(
            &self,
            file: &SourceFile,
            _params: &ConversionParameters,
        ) -> Result<ConversionRun, ApiError> {
            let run_id = {
                let mut calls = self.convert_calls.lock().unwrap();
                *calls += 1;
                *calls as i64
            };
            let mapped = self.mapped.lock().unwrap();
            let unmapped_codes: Vec<String> = self
                .file_codes
                .iter()
                .filter(|code| !mapped.contains_key(**code))
                .map(|code| code.to_string())
                .collect();
            Ok(ConversionRun {
                run_id,
                source_file_name: file.name.clone(),
                records_processed: self.records_processed,
                entries_generated: self.records_processed - unmapped_codes.len() as u64,
                unmapped_codes,
                output_url: format!("/procesamiento/descargar/{run_id}"),
                message: "Procesamiento completado exitosamente".to_string(),
            })
        }

        async fn create_mapping(
            &self,
            product_code: &str,
            account_code: &str,
        ) -> Result<(), ApiError> {
            self.create_calls
                .lock()
                .unwrap()
                .push(product_code.to_string());
            if self.failing_creates.lock().unwrap().contains(product_code) {
                return Err(ApiError::Transfer("connection reset".to_string()));
            }
            let mut mapped = self.mapped.lock().unwrap();
            if mapped.contains_key(product_code) {
                return Err(ApiError::Conflict("El producto ya existe".to_string()));
            }
            mapped.insert(product_code.to_string(), account_code.to_string());
            Ok(())
        }
    }

    fn sales_file() -> SourceFile {
        SourceFile {
            name: "ventas_agosto.xlsx".to_string(),
            bytes: vec![0x50, 0x4b, 0x03, 0x04],
        }
    }

    fn august_params() -> ConversionParameters {
        ConversionParameters {
            period_month: "08".to_string(),
            starting_ledger_book: 1,
            starting_voucher_number: 1,
        }
    }

    fn pending_codes<'a>(flow: &'a Reconciler<&'a FakeService>) -> Vec<&'a str> {
        flow.pending()
            .iter()
            .map(|row| row.product_code.as_str())
            .collect()
    }

    #[tokio::test]
    async fn resubmitting_without_changes_reports_the_same_gaps() {
        let service = FakeService::new(vec!["PROD-X", "PROD-Y"], 120);
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());

        flow.submit().await.unwrap();
        let first: HashSet<String> = flow.run().unwrap().unmapped_codes.iter().cloned().collect();
        let first_records = flow.run().unwrap().records_processed;

        flow.submit().await.unwrap();
        let second: HashSet<String> =
            flow.run().unwrap().unmapped_codes.iter().cloned().collect();

        assert_eq!(first, second);
        assert_eq!(first_records, flow.run().unwrap().records_processed);
        assert_eq!(2, service.convert_calls());
    }

    #[tokio::test]
    async fn save_and_reprocess_converges() {
        let service = FakeService::new(vec!["PROD-X", "PROD-Y"], 120);
        let mut flow = Reconciler::new(&service);
        assert_eq!(Phase::Idle, flow.phase());

        flow.select_file(sales_file(), august_params());
        assert_eq!(Phase::FileSelected, flow.phase());

        flow.submit().await.unwrap();
        assert_eq!(Phase::NeedsReconciliation, flow.phase());
        let run = flow.run().unwrap();
        assert_eq!(120, run.records_processed);
        assert_eq!(118, run.entries_generated);
        assert_eq!(vec!["PROD-X", "PROD-Y"], pending_codes(&flow));

        assert!(flow.set_account_code("PROD-X", "70101"));
        assert!(flow.set_account_code("PROD-Y", "70102"));
        let report = flow.save_corrections().await.unwrap();
        assert_eq!(2, report.saved());
        assert_eq!(0, report.failed());

        flow.resubmit().await.unwrap();
        assert_eq!(Phase::Converged, flow.phase());
        assert!(flow.run().unwrap().is_converged());
        assert!(flow.pending().is_empty());
    }

    #[tokio::test]
    async fn conflicting_create_counts_as_persisted() {
        let service = FakeService::new(vec!["PROD-X", "PROD-Y"], 120);
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());
        flow.submit().await.unwrap();

        // Another operator maps PROD-Y while ours is typing.
        service.add_mapping("PROD-Y", "70200");

        flow.set_account_code("PROD-X", "70101");
        flow.set_account_code("PROD-Y", "70102");
        let report = flow.save_corrections().await.unwrap();
        assert_eq!(1, report.saved());
        assert_eq!(1, report.already_mapped());
        assert_eq!(2, report.persisted());
        assert!(!report.all_failed());

        // Reprocessing proceeds and the pre-existing mapping is honored.
        flow.resubmit().await.unwrap();
        assert_eq!(Phase::Converged, flow.phase());
    }

    #[tokio::test]
    async fn removed_row_is_never_saved_but_reappears() {
        let service = FakeService::new(vec!["PROD-X", "PROD-Y"], 120);
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());
        flow.submit().await.unwrap();

        flow.set_account_code("PROD-X", "70101");
        assert!(flow.remove_correction("PROD-Y"));
        assert!(!flow.remove_correction("PROD-Y"));

        let report = flow.save_corrections().await.unwrap();
        assert_eq!(1, report.saved());
        assert_eq!(vec!["PROD-X".to_string()], service.create_calls());

        // Still unmapped, so the next run brings it back.
        flow.resubmit().await.unwrap();
        assert_eq!(Phase::NeedsReconciliation, flow.phase());
        assert_eq!(vec!["PROD-Y"], pending_codes(&flow));
    }

    #[tokio::test]
    async fn blank_account_code_rejects_the_whole_batch() {
        let service = FakeService::new(vec!["PROD-X", "PROD-Y"], 120);
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());
        flow.submit().await.unwrap();

        flow.set_account_code("PROD-X", "70101");
        flow.set_account_code("PROD-Y", "   ");
        let err = flow.save_corrections().await.unwrap_err();
        assert!(matches!(err, WorkflowError::IncompleteCorrections(1)));

        // Nothing was sent, nothing was lost.
        assert!(service.create_calls().is_empty());
        assert_eq!(Phase::NeedsReconciliation, flow.phase());
        assert_eq!(2, flow.pending().len());
    }

    #[tokio::test]
    async fn partial_failure_keeps_the_workflow_going() {
        let service = FakeService::new(vec!["PROD-X", "PROD-Y"], 120);
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());
        flow.submit().await.unwrap();

        service.fail_creates_for(&["PROD-Y"]);
        flow.set_account_code("PROD-X", "70101");
        flow.set_account_code("PROD-Y", "70102");
        let report = flow.save_corrections().await.unwrap();
        assert_eq!(1, report.saved());
        assert_eq!(1, report.failed());
        assert!(!report.all_failed());
        assert_eq!(Phase::NeedsReconciliation, flow.phase());
    }

    #[tokio::test]
    async fn fully_failed_batch_keeps_corrections_for_retry() {
        let service = FakeService::new(vec!["PROD-X", "PROD-Y"], 120);
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());
        flow.submit().await.unwrap();

        service.fail_creates_for(&["PROD-X", "PROD-Y"]);
        flow.set_account_code("PROD-X", "70101");
        flow.set_account_code("PROD-Y", "70102");
        let report = flow.save_corrections().await.unwrap();
        assert!(report.all_failed());
        assert_eq!(Phase::Failed, flow.phase());
        assert_eq!(2, flow.pending().len());

        // The service recovers; retrying the batch from Failed works.
        service.fail_creates_for(&[]);
        let report = flow.save_corrections().await.unwrap();
        assert_eq!(2, report.saved());
        assert_eq!(Phase::NeedsReconciliation, flow.phase());
    }

    #[tokio::test]
    async fn stale_response_is_ignored_after_new_file() {
        let service = FakeService::new(vec!["PROD-X"], 10);
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());
        let stale_generation = flow.generation();

        // The operator picks a new file while the old submission is in
        // flight; its late response must not touch the fresh workflow.
        flow.select_file(
            SourceFile {
                name: "ventas_septiembre.xlsx".to_string(),
                bytes: vec![0x50, 0x4b, 0x03, 0x04],
            },
            august_params(),
        );
        let stale_run = ConversionRun {
            run_id: 99,
            source_file_name: "ventas_agosto.xlsx".to_string(),
            records_processed: 10,
            entries_generated: 9,
            unmapped_codes: vec!["PROD-X".to_string()],
            output_url: "/procesamiento/descargar/99".to_string(),
            message: "Procesamiento completado exitosamente".to_string(),
        };
        assert!(!flow.apply_run(stale_generation, stale_run));
        assert_eq!(Phase::FileSelected, flow.phase());
        assert!(flow.pending().is_empty());
        assert!(flow.run().is_none());
    }

    #[tokio::test]
    async fn invalid_parameters_never_reach_the_service() {
        let service = FakeService::new(vec!["PROD-X"], 10);
        let mut flow = Reconciler::new(&service);
        flow.select_file(
            sales_file(),
            ConversionParameters {
                period_month: "13".to_string(),
                starting_ledger_book: 1,
                starting_voucher_number: 1,
            },
        );

        let err = flow.submit().await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidParameters(_)));
        assert_eq!(Phase::FileSelected, flow.phase());
        assert_eq!(0, service.convert_calls());
    }

    #[tokio::test]
    async fn submit_without_file_is_rejected() {
        let service = FakeService::new(vec![], 0);
        let mut flow = Reconciler::new(&service);
        let err = flow.submit().await.unwrap_err();
        assert!(matches!(err, WorkflowError::NoFileSelected));
        assert_eq!(0, service.convert_calls());
    }

    #[tokio::test]
    async fn new_file_clears_previous_run_state() {
        let service = FakeService::new(vec!["PROD-X"], 10);
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());
        flow.submit().await.unwrap();
        assert_eq!(Phase::NeedsReconciliation, flow.phase());
        flow.set_account_code("PROD-X", "70101");

        flow.select_file(sales_file(), august_params());
        assert_eq!(Phase::FileSelected, flow.phase());
        assert!(flow.run().is_none());
        assert!(flow.pending().is_empty());
        assert!(matches!(
            flow.save_corrections().await.unwrap_err(),
            WorkflowError::NothingToSave
        ));
    }

    #[tokio::test]
    async fn convergence_skips_codes_mapped_before_the_first_run() {
        let service = FakeService {
            file_codes: vec!["PROD-OLD", "PROD-X"],
            records_processed: 50,
            mapped: Mutex::new(
                hash_map!["PROD-OLD".to_string() => "70100".to_string()],
            ),
            failing_creates: Mutex::new(HashSet::new()),
            convert_calls: Mutex::new(0),
            create_calls: Mutex::new(Vec::new()),
        };
        let mut flow = Reconciler::new(&service);
        flow.select_file(sales_file(), august_params());
        flow.submit().await.unwrap();
        assert_eq!(vec!["PROD-X"], pending_codes(&flow));
    }
}
