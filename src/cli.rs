use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, ensure, Context as _, Result};
use chrono::NaiveDateTime;
use console::{pad_str, style, Alignment, StyledObject};
use indicatif::ProgressBar;

use crate::api::auth::{Credentials, Registration};
use crate::api::conversion::{ConversionParameters, ConversionRun, SourceFile};
use crate::api::history::{HistoryRecord, RunStatus};
use crate::api::mappings::{
    ComboJumpRule, ComboRuleChanges, ProductAccountMapping, ProductMappingChanges,
};
use crate::api::{self, ApiClient, ApiError, CredentialStore};
use crate::args::{Args, Command, CombosCommand, HistoryCommand, MappingsCommand};
use crate::reconcile::{BatchReport, Phase, Reconciler, RowOutcome, WorkflowError};
use crate::session::{SessionStore, SESSION_PATH};
use crate::terminal::{self, BulletPointPrinter, StdoutLineWriter};

pub async fn main(args: Args) -> Result<()> {
    let cli = Cli::new().await?;
    match args.command {
        Command::Login { server } => cli.main_login(server).await?,
        Command::Register => cli.main_register().await?,
        Command::Logout => cli.main_logout().await?,
        Command::Whoami => cli.main_whoami().await?,
        Command::Process {
            file,
            month,
            ledger_book,
            voucher,
            output,
        } => {
            cli.main_process(file, month, ledger_book, voucher, output)
                .await?
        }
        Command::Download { run_id, output } => cli.main_download(run_id, output).await?,
        Command::Mappings(command) => match command {
            MappingsCommand::List { all } => cli.main_mappings_list(all).await?,
            MappingsCommand::Add { product, account } => {
                cli.main_mappings_add(product, account).await?
            }
            MappingsCommand::Update {
                id,
                product,
                account,
                active,
            } => cli.main_mappings_update(id, product, account, active).await?,
            MappingsCommand::Remove { id } => cli.main_mappings_remove(id).await?,
            MappingsCommand::Import { file } => cli.main_mappings_import(file).await?,
        },
        Command::Combos(command) => match command {
            CombosCommand::List { all } => cli.main_combos_list(all).await?,
            CombosCommand::Add { combo, jump } => cli.main_combos_add(combo, jump).await?,
            CombosCommand::Update {
                id,
                combo,
                jump,
                active,
            } => cli.main_combos_update(id, combo, jump, active).await?,
            CombosCommand::Remove { id } => cli.main_combos_remove(id).await?,
            CombosCommand::Import { file } => cli.main_combos_import(file).await?,
        },
        Command::History(command) => match command {
            HistoryCommand::List { limit } => cli.main_history_list(limit).await?,
            HistoryCommand::Show { id } => cli.main_history_show(id).await?,
            HistoryCommand::Delete { id } => cli.main_history_delete(id).await?,
        },
    }
    Ok(())
}

pub struct Cli {
    session: Arc<SessionStore>,
    api: ApiClient,
}

impl Cli {
    pub async fn new() -> Result<Cli> {
        let session = Arc::new(SessionStore::open(SESSION_PATH).await?);
        let server_url = session.server_url().await;
        let credentials: Arc<dyn CredentialStore> = session.clone();
        let api = ApiClient::new(server_url, credentials);
        Ok(Cli { session, api })
    }

    async fn require_login(&self) -> Result<()> {
        if !self.session.logged_in().await {
            bail!("Not logged in. Run `concar-import login` first.");
        }
        Ok(())
    }

    pub async fn main_login(&self, server: Option<String>) -> Result<()> {
        let server_url = match server {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => self.session.server_url().await,
        };
        let credentials: Arc<dyn CredentialStore> = self.session.clone();
        let api = ApiClient::new(server_url.clone(), credentials);

        let email = terminal::input("Email")?;
        let password = terminal::password("Password")?;
        let token = match api::auth::login(&api, &Credentials { email: email.clone(), password })
            .await
        {
            Ok(token) => token,
            Err(ApiError::Auth) => bail!("Invalid email or password"),
            Err(err) => return Err(err).context("Login failed"),
        };
        self.session
            .store_login(server_url, token.secret().to_string(), email)
            .await?;

        // Also proves the stored token works before the operator relies on it.
        let user = api::auth::current_user(&api).await?;
        println!("Logged in as {} <{}>", style_user(&user.name), user.email);
        Ok(())
    }

    pub async fn main_register(&self) -> Result<()> {
        let name = terminal::input("Name")?;
        let email = terminal::input("Email")?;
        let password = terminal::password("Password")?;
        let user = api::auth::register(
            &self.api,
            &Registration {
                email,
                name,
                password,
            },
        )
        .await
        .context("Registration failed")?;
        println!(
            "Created account {} <{}>. Log in with `concar-import login`.",
            style_user(&user.name),
            user.email
        );
        Ok(())
    }

    pub async fn main_logout(&self) -> Result<()> {
        self.session.clear_credential().await?;
        println!("Logged out.");
        Ok(())
    }

    pub async fn main_whoami(&self) -> Result<()> {
        self.require_login().await?;
        let user = api::auth::current_user(&self.api).await?;
        let printer = BulletPointPrinter::new_stdout();
        println!("{}", style_header("Session:"));
        printer.print_item(format!("server: {}", self.api.base_url()));
        printer.print_item(format!("account: {} <{}>", style_user(&user.name), user.email));
        if user.is_admin {
            printer.print_item("role: admin");
        }
        Ok(())
    }

    pub async fn main_process(
        &self,
        file: PathBuf,
        month: Option<String>,
        ledger_book: Option<u32>,
        voucher: Option<u32>,
        output: Option<PathBuf>,
    ) -> Result<()> {
        self.require_login().await?;
        let source = read_source_file(&file).await?;
        let params = gather_parameters(month, ledger_book, voucher)?;

        let mut flow = Reconciler::new(self.api.clone());
        flow.select_file(source, params);
        self.run_conversion_step(&mut flow, "Converting sales file...")
            .await?;

        loop {
            match flow.phase() {
                Phase::Converged => {
                    let run = flow
                        .run()
                        .ok_or_else(|| anyhow!("Converged without a conversion result"))?;
                    print_run_summary(run);
                    println!();
                    self.offer_download(run.run_id, output.as_deref()).await?;
                    return Ok(());
                }
                Phase::NeedsReconciliation => {
                    let run = flow
                        .run()
                        .ok_or_else(|| anyhow!("Reconciling without a conversion result"))?;
                    print_run_summary(run);
                    println!();
                    collect_corrections(&mut flow)?;

                    if flow.pending().is_empty() {
                        if terminal::confirm("Every row was skipped. Re-run the conversion anyway?", false)? {
                            self.run_conversion_step(&mut flow, "Reprocessing sales file...")
                                .await?;
                            continue;
                        }
                        println!("Leaving the run unconverged; the skipped codes stay unmapped.");
                        return Ok(());
                    }

                    let choice = terminal::select(
                        &format!("{} mapping(s) ready", flow.pending().len()),
                        &[
                            "Save mappings & reprocess",
                            "Save mappings only",
                            "Discard and quit",
                        ],
                    )?;
                    if choice == 2 {
                        println!("Discarded. Nothing was saved.");
                        return Ok(());
                    }

                    let report = match self.save_with_retry(&mut flow).await? {
                        Some(report) => report,
                        // The operator gave up on a fully failed batch.
                        None => return Ok(()),
                    };
                    print_batch_report(&report);

                    if choice == 0 {
                        self.run_conversion_step(&mut flow, "Reprocessing sales file...")
                            .await?;
                        continue;
                    }
                    println!("Mappings saved. Re-run `process` to pick up the new dictionary.");
                    return Ok(());
                }
                phase => bail!("Unexpected workflow phase {phase:?}"),
            }
        }
    }

    async fn run_conversion_step(
        &self,
        flow: &mut Reconciler<ApiClient>,
        message: &str,
    ) -> Result<()> {
        let spinner = spinner(message);
        let result = if flow.run().is_some() {
            flow.resubmit().await
        } else {
            flow.submit().await
        };
        spinner.finish_and_clear();
        match result {
            Ok(()) => Ok(()),
            Err(WorkflowError::InvalidParameters(problems)) => {
                bail!("Invalid parameters: {}", problems.join("; "))
            }
            Err(err) => Err(err).context("Conversion failed"),
        }
    }

    /// Run the save batch, offering a retry while every row keeps failing.
    /// Returns None when the operator gives up.
    async fn save_with_retry(
        &self,
        flow: &mut Reconciler<ApiClient>,
    ) -> Result<Option<BatchReport>> {
        loop {
            let report = flow
                .save_corrections()
                .await
                .context("Saving mappings failed")?;
            if !report.all_failed() {
                return Ok(Some(report));
            }
            print_batch_report(&report);
            println!(
                "{}",
                style("No mapping could be saved; the corrections are still here.").red()
            );
            if !terminal::confirm("Retry the batch?", true)? {
                return Ok(None);
            }
        }
    }

    async fn offer_download(&self, run_id: i64, output: Option<&Path>) -> Result<()> {
        let path = match output {
            Some(path) => path.to_path_buf(),
            None => {
                println!(
                    "Workbook ready at {}",
                    api::conversion::download_url(&self.api, run_id)
                );
                if !terminal::confirm("Download it now?", true)? {
                    return Ok(());
                }
                PathBuf::from(format!("asientos_{run_id}.xlsx"))
            }
        };
        self.download_to(run_id, &path).await
    }

    pub async fn main_download(&self, run_id: i64, output: Option<PathBuf>) -> Result<()> {
        self.require_login().await?;
        let path = output.unwrap_or_else(|| PathBuf::from(format!("asientos_{run_id}.xlsx")));
        self.download_to(run_id, &path).await
    }

    async fn download_to(&self, run_id: i64, path: &Path) -> Result<()> {
        let bytes = api::conversion::download_output(&self.api, run_id)
            .await
            .context("Failed to download the generated workbook")?;
        tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
        Ok(())
    }

    pub async fn main_mappings_list(&self, all: bool) -> Result<()> {
        self.require_login().await?;
        let active_only = if all { None } else { Some(true) };
        let mappings = api::mappings::list_product_mappings(&self.api, active_only).await?;
        println!("{}", style_header("Product mappings:"));
        if mappings.is_empty() {
            println!("(none)");
            return Ok(());
        }
        let printer = BulletPointPrinter::new_stdout();
        for mapping in &mappings {
            print_mapping(&printer, mapping);
        }
        Ok(())
    }

    pub async fn main_mappings_add(
        &self,
        product: Option<String>,
        account: Option<String>,
    ) -> Result<()> {
        self.require_login().await?;
        let product = match product {
            Some(product) => product,
            None => terminal::input("Product code")?,
        };
        let account = match account {
            Some(account) => account,
            None => terminal::input("Account code")?,
        };
        match api::mappings::create_product_mapping(&self.api, &product, &account).await {
            Ok(mapping) => {
                println!(
                    "Mapped {} -> {}",
                    style_product(&mapping.product_code),
                    style_account(&mapping.account_code)
                );
                Ok(())
            }
            Err(ApiError::Conflict(message)) => bail!("{message}"),
            Err(err) => Err(err).context("Failed to create the mapping"),
        }
    }

    pub async fn main_mappings_update(
        &self,
        id: i64,
        product: Option<String>,
        account: Option<String>,
        active: Option<bool>,
    ) -> Result<()> {
        self.require_login().await?;
        ensure!(
            product.is_some() || account.is_some() || active.is_some(),
            "Nothing to change; pass --product, --account or --active"
        );
        let changes = ProductMappingChanges {
            product_code: product,
            account_code: account,
            active,
        };
        let mapping = api::mappings::update_product_mapping(&self.api, id, &changes).await?;
        println!(
            "Updated {} -> {}{}",
            style_product(&mapping.product_code),
            style_account(&mapping.account_code),
            if mapping.active { "" } else { " (inactive)" }
        );
        Ok(())
    }

    pub async fn main_mappings_remove(&self, id: i64) -> Result<()> {
        self.require_login().await?;
        if !terminal::confirm(&format!("Deactivate mapping {id}?"), false)? {
            return Ok(());
        }
        api::mappings::delete_product_mapping(&self.api, id).await?;
        println!("Mapping {id} deactivated.");
        Ok(())
    }

    pub async fn main_mappings_import(&self, file: PathBuf) -> Result<()> {
        self.require_login().await?;
        let source = read_source_file(&file).await?;
        let summary = api::mappings::import_product_mappings(&self.api, &source).await?;
        println!("{}", summary.message);
        Ok(())
    }

    pub async fn main_combos_list(&self, all: bool) -> Result<()> {
        self.require_login().await?;
        let active_only = if all { None } else { Some(true) };
        let rules = api::mappings::list_combo_rules(&self.api, active_only).await?;
        println!("{}", style_header("Combo jump rules:"));
        if rules.is_empty() {
            println!("(none)");
            return Ok(());
        }
        let printer = BulletPointPrinter::new_stdout();
        for rule in &rules {
            print_combo_rule(&printer, rule);
        }
        Ok(())
    }

    pub async fn main_combos_add(&self, combo: Option<String>, jump: Option<i64>) -> Result<()> {
        self.require_login().await?;
        let combo = match combo {
            Some(combo) => combo,
            None => terminal::input("Combo code")?,
        };
        let jump = match jump {
            Some(jump) => jump,
            None => terminal::input("Jump count")?
                .trim()
                .parse()
                .context("Jump count must be a number")?,
        };
        match api::mappings::create_combo_rule(&self.api, &combo, jump).await {
            Ok(rule) => {
                println!(
                    "Added rule {} (jump {})",
                    style_product(&rule.combo_code),
                    rule.jump_count
                );
                Ok(())
            }
            Err(ApiError::Conflict(message)) => bail!("{message}"),
            Err(err) => Err(err).context("Failed to create the rule"),
        }
    }

    pub async fn main_combos_update(
        &self,
        id: i64,
        combo: Option<String>,
        jump: Option<i64>,
        active: Option<bool>,
    ) -> Result<()> {
        self.require_login().await?;
        ensure!(
            combo.is_some() || jump.is_some() || active.is_some(),
            "Nothing to change; pass --combo, --jump or --active"
        );
        let changes = ComboRuleChanges {
            combo_code: combo,
            jump_count: jump,
            active,
        };
        let rule = api::mappings::update_combo_rule(&self.api, id, &changes).await?;
        println!(
            "Updated {} (jump {}){}",
            style_product(&rule.combo_code),
            rule.jump_count,
            if rule.active { "" } else { " (inactive)" }
        );
        Ok(())
    }

    pub async fn main_combos_remove(&self, id: i64) -> Result<()> {
        self.require_login().await?;
        if !terminal::confirm(&format!("Deactivate rule {id}?"), false)? {
            return Ok(());
        }
        api::mappings::delete_combo_rule(&self.api, id).await?;
        println!("Rule {id} deactivated.");
        Ok(())
    }

    pub async fn main_combos_import(&self, file: PathBuf) -> Result<()> {
        self.require_login().await?;
        let source = read_source_file(&file).await?;
        let summary = api::mappings::import_combo_rules(&self.api, &source).await?;
        println!("{}", summary.message);
        Ok(())
    }

    pub async fn main_history_list(&self, limit: u32) -> Result<()> {
        self.require_login().await?;
        let records = api::history::list(&self.api, limit).await?;
        println!("{}", style_header("Conversion history:"));
        if records.is_empty() {
            println!("(none)");
            return Ok(());
        }
        let printer = BulletPointPrinter::new_stdout();
        for record in &records {
            print_history_line(&printer, record);
        }
        Ok(())
    }

    pub async fn main_history_show(&self, id: i64) -> Result<()> {
        self.require_login().await?;
        let record = match api::history::get(&self.api, id).await {
            Ok(record) => record,
            Err(ApiError::NotFound(message)) => bail!("Run {id}: {message}"),
            Err(err) => return Err(err.into()),
        };
        print_history_detail(&record);
        Ok(())
    }

    pub async fn main_history_delete(&self, id: i64) -> Result<()> {
        self.require_login().await?;
        if !terminal::confirm(&format!("Delete history record {id}?"), false)? {
            return Ok(());
        }
        match api::history::delete(&self.api, id).await {
            Ok(()) => {
                println!("Deleted record {id}.");
                Ok(())
            }
            Err(ApiError::NotFound(message)) => bail!("Run {id}: {message}"),
            Err(err) => Err(err.into()),
        }
    }
}

async fn read_source_file(path: &Path) -> Result<SourceFile> {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))?
        .to_string();
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file = SourceFile { name, bytes };
    ensure!(
        file.has_allowed_extension(),
        "{} is not an Excel spreadsheet (.xls/.xlsx)",
        file.name
    );
    Ok(file)
}

fn gather_parameters(
    month: Option<String>,
    ledger_book: Option<u32>,
    voucher: Option<u32>,
) -> Result<ConversionParameters> {
    let period_month = match month {
        Some(month) => month,
        None => terminal::input("Period month (01-12)")?,
    };
    let starting_ledger_book = match ledger_book {
        Some(ledger_book) => ledger_book,
        None => terminal::input("Starting ledger book")?
            .trim()
            .parse()
            .context("Ledger book must be a number")?,
    };
    let starting_voucher_number = match voucher {
        Some(voucher) => voucher,
        None => terminal::input("Starting voucher number (1-9999)")?
            .trim()
            .parse()
            .context("Voucher number must be a number")?,
    };
    let params = ConversionParameters {
        period_month: period_month.trim().to_string(),
        starting_ledger_book,
        starting_voucher_number,
    };
    if let Err(problems) = params.validate() {
        bail!("Invalid parameters: {}", problems.join("; "));
    }
    Ok(params)
}

/// Walk the pending rows once: an answer fills the row in, an empty answer
/// opts the code out of this save batch.
fn collect_corrections(flow: &mut Reconciler<ApiClient>) -> Result<()> {
    println!("Enter an account code per product; leave empty to skip a code this round.");
    let codes: Vec<String> = flow
        .pending()
        .iter()
        .map(|row| row.product_code.clone())
        .collect();
    for code in codes {
        match terminal::optional_input(&format!("Account for {code}"))? {
            Some(account) => {
                flow.set_account_code(&code, &account);
            }
            None => {
                flow.remove_correction(&code);
            }
        }
    }
    Ok(())
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

fn print_run_summary(run: &ConversionRun) {
    println!("{}", style_header("Conversion result:"));
    let printer = BulletPointPrinter::new_stdout();
    printer.print_item(format!("file: {}", run.source_file_name));
    printer.print_item(format!("records processed: {}", run.records_processed));
    printer.print_item(format!("entries generated: {}", run.entries_generated));
    if run.unmapped_codes.is_empty() {
        printer.print_item(style("every product is mapped").green());
    } else {
        printer.print_item(format!(
            "products without an account ({}):",
            run.unmapped_codes.len()
        ));
        let nested = printer.indent();
        for code in &run.unmapped_codes {
            nested.print_item(style_unmapped(code));
        }
    }
}

fn print_batch_report(report: &BatchReport) {
    let printer = BulletPointPrinter::new_stdout();
    for row in &report.rows {
        let outcome = match &row.outcome {
            RowOutcome::Saved => style("saved").green(),
            RowOutcome::AlreadyMapped => style("already mapped").yellow(),
            RowOutcome::Failed(reason) => style_failure(reason),
        };
        printer.print_item(format!("{}: {}", style_product(&row.product_code), outcome));
    }
    println!(
        "{} saved, {} already mapped, {} failed",
        report.saved(),
        report.already_mapped(),
        report.failed()
    );
}

fn print_mapping(printer: &BulletPointPrinter<StdoutLineWriter>, mapping: &ProductAccountMapping) {
    printer.print_item(format!(
        "{} {} -> {}{}",
        pad_str(&format!("#{}", mapping.id), 7, Alignment::Right, None),
        pad_str(
            &style_product(&mapping.product_code).to_string(),
            24,
            Alignment::Left,
            None
        ),
        style_account(&mapping.account_code),
        if mapping.active {
            "".to_string()
        } else {
            style(" (inactive)").dim().to_string()
        }
    ));
}

fn print_combo_rule(printer: &BulletPointPrinter<StdoutLineWriter>, rule: &ComboJumpRule) {
    printer.print_item(format!(
        "{} {} jump {}{}",
        pad_str(&format!("#{}", rule.id), 7, Alignment::Right, None),
        pad_str(
            &style_product(&rule.combo_code).to_string(),
            24,
            Alignment::Left,
            None
        ),
        rule.jump_count,
        if rule.active {
            "".to_string()
        } else {
            style(" (inactive)").dim().to_string()
        }
    ));
}

fn print_history_line(printer: &BulletPointPrinter<StdoutLineWriter>, record: &HistoryRecord) {
    let unmapped = record.unmapped_codes();
    let gaps = if unmapped.is_empty() {
        "".to_string()
    } else {
        format!(", {} unmapped", unmapped.len())
    };
    printer.print_item(format!(
        "#{} {} [{}] {} records -> {} entries, {}{}, {}",
        record.id,
        record.source_file_name,
        record.period_month,
        record.records_processed,
        record.entries_generated,
        style_status(record.status),
        gaps,
        style_date(&record.created_at),
    ));
}

fn print_history_detail(record: &HistoryRecord) {
    println!("{}", style_header(&format!("Run #{}:", record.id)));
    let printer = BulletPointPrinter::new_stdout();
    printer.print_item(format!("file: {}", record.source_file_name));
    printer.print_item(format!("month: {}", record.period_month));
    printer.print_item(format!("ledger book: {}", record.starting_ledger_book));
    printer.print_item(format!("voucher: {}", record.starting_voucher_number));
    printer.print_item(format!("records processed: {}", record.records_processed));
    printer.print_item(format!("entries generated: {}", record.entries_generated));
    printer.print_item(format!("status: {}", style_status(record.status)));
    if let Some(message) = &record.error_message {
        printer.print_item(format!("error: {}", style_failure(message)));
    }
    if let Some(operator) = &record.processed_by {
        printer.print_item(format!("processed by: {operator}"));
    }
    printer.print_item(format!("at: {}", style_date(&record.created_at)));
    let unmapped = record.unmapped_codes();
    if !unmapped.is_empty() {
        printer.print_item(format!("unmapped products ({}):", unmapped.len()));
        let nested = printer.indent();
        for code in &unmapped {
            nested.print_item(style_unmapped(code));
        }
    }
}

fn style_header(header: &str) -> StyledObject<&str> {
    style(header).bold().underlined()
}

fn style_user(name: &str) -> StyledObject<&str> {
    style(name).cyan().bold()
}

fn style_product(code: &str) -> StyledObject<&str> {
    style(code).cyan()
}

fn style_account(code: &str) -> StyledObject<&str> {
    style(code).magenta().bold()
}

fn style_unmapped(code: &str) -> StyledObject<&str> {
    style(code).yellow()
}

fn style_failure(reason: &str) -> StyledObject<&str> {
    style(reason).red()
}

fn style_status(status: RunStatus) -> StyledObject<&'static str> {
    match status {
        RunStatus::Completed => style("completado").green(),
        RunStatus::Failed => style("error").red(),
    }
}

fn style_date(date: &NaiveDateTime) -> StyledObject<String> {
    style(date.format("%Y-%m-%d %H:%M").to_string())
}
