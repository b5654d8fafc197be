use clap::{Parser, Subcommand, ValueEnum};
use convolens_skill::Provider;

#[derive(Parser)]
#[command(
    name = "convolens",
    version,
    about = "Skill-first mechanism diagnosis pipeline for LLM conversation logs"
)]
pub struct Cli {
    /// Skill root directory holding data/, skills/, output/ and config.yaml
    #[arg(long, global = true, default_value = ".")]
    pub root: String,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the end-to-end serial pipeline (default when no subcommand is given)")]
    Run(RunArgs),

    #[command(about = "Run pipeline health checks without mutating any state")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON")]
        json: bool,
    },

    #[command(about = "Compile-check the workspace and run the test suites")]
    Test {
        #[arg(long, value_enum, default_value_t = TestMode::Segmented)]
        mode: TestMode,
    },

    #[command(about = "Skill-first diagnosis (session backfill, incremental aggregation)")]
    Diagnose {
        #[command(subcommand)]
        command: DiagnoseCommand,
    },
}

#[derive(Subcommand)]
pub enum DiagnoseCommand {
    #[command(about = "Auto backfill session sidecars and apply results")]
    Backfill(BackfillArgs),

    #[command(about = "Build/apply the incremental mechanism payload")]
    Incremental(IncrementalArgs),
}

#[derive(Debug, Clone, clap::Args)]
pub struct RunArgs {
    #[arg(long, value_enum, default_value_t = RunMode::Incremental)]
    pub mode: RunMode,

    #[arg(long, default_value = "30d", help = "Rolling window for incremental mode")]
    pub window: String,

    #[arg(long, help = "Optional since date YYYY-MM-DD for ingest")]
    pub since: Option<String>,

    #[arg(long, help = "Optional run id used in the diagnose stage")]
    pub run_id: Option<String>,

    #[arg(long, help = "Do not write to the external report database")]
    pub dry_run: bool,

    #[arg(long, help = "Skip external-database reads when rendering the dashboard")]
    pub no_notion: bool,

    #[arg(long, help = "Dashboard output path")]
    pub output: Option<String>,

    #[arg(long, default_value_t = 50, help = "Dashboard report limit (0 for all)")]
    pub report_limit: u64,

    #[arg(long, help = "Skip the ingestion stage")]
    pub skip_ingest: bool,

    #[arg(long, help = "Skip the heuristic enrich stage")]
    pub skip_enrich: bool,

    #[arg(long, help = "Optional limit for heuristic enrich")]
    pub enrich_limit: Option<u64>,

    #[arg(long, help = "Skip the session sidecar backfill stage")]
    pub skip_backfill: bool,

    #[arg(long, value_enum, default_value_t = ProviderArg::ClaudeCli, help = "Skill API provider")]
    pub skill_provider: ProviderArg,

    #[arg(long, help = "Optional provider model override")]
    pub skill_model: Option<String>,

    #[arg(long, default_value_t = 180, help = "Skill API timeout seconds")]
    pub skill_timeout_sec: u64,

    #[arg(long, default_value_t = 4, help = "Concurrent workers for skill backfill")]
    pub skill_max_workers: usize,

    #[arg(long, help = "Optional session limit for the backfill stage")]
    pub backfill_limit: Option<usize>,

    #[arg(long, help = "Force refresh even when a sidecar exists")]
    pub backfill_force_refresh: bool,

    #[arg(long, help = "Allow partial API failures in the backfill stage")]
    pub allow_partial_backfill: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            mode: RunMode::Incremental,
            window: "30d".to_string(),
            since: None,
            run_id: None,
            dry_run: false,
            no_notion: false,
            output: None,
            report_limit: 50,
            skip_ingest: false,
            skip_enrich: false,
            enrich_limit: None,
            skip_backfill: false,
            skill_provider: ProviderArg::ClaudeCli,
            skill_model: None,
            skill_timeout_sec: 180,
            skill_max_workers: 4,
            backfill_limit: None,
            backfill_force_refresh: false,
            allow_partial_backfill: false,
        }
    }
}

#[derive(Debug, Clone, clap::Args)]
pub struct BackfillArgs {
    #[arg(long, default_value = "30d", help = "Window like 30d or all-time")]
    pub window: String,

    #[arg(long, help = "Start date YYYY-MM-DD (overrides --window)")]
    pub since: Option<String>,

    #[arg(long, help = "End date YYYY-MM-DD")]
    pub until: Option<String>,

    #[arg(long, value_enum, default_value_t = SourceArg::All, help = "Source filter")]
    pub source: SourceArg,

    #[arg(long, help = "Optional max candidate sessions")]
    pub limit: Option<usize>,

    #[arg(long, help = "Optional run id")]
    pub run_id: Option<String>,

    #[arg(long, value_enum, default_value_t = ProviderArg::ClaudeCli, help = "API provider")]
    pub provider: ProviderArg,

    #[arg(long, help = "Optional API model override")]
    pub model: Option<String>,

    #[arg(long, default_value_t = 180, help = "API timeout seconds")]
    pub timeout_sec: u64,

    #[arg(long, default_value_t = 4, help = "Concurrent workers for the API provider")]
    pub max_workers: usize,

    #[arg(long, help = "Refresh all selected sessions")]
    pub force_refresh: bool,

    #[arg(long, help = "Allow partial API failures (default: fail if any session fails)")]
    pub allow_partial: bool,

    #[arg(long, help = "Preview only")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, clap::Args)]
pub struct IncrementalArgs {
    #[arg(long, help = "Incremental period identifier")]
    pub period_id: Option<String>,

    #[arg(long, default_value = "30d", help = "Rolling window like 30d or all-time")]
    pub window: String,

    #[arg(long, help = "Start date YYYY-MM-DD (overrides --window)")]
    pub since: Option<String>,

    #[arg(long, help = "End date YYYY-MM-DD (defaults to today when a window is used)")]
    pub until: Option<String>,

    #[arg(long, help = "Incremental mechanism JSON result file (skips inference)")]
    pub result_file: Option<String>,

    #[arg(long, help = "Optional source run identifier")]
    pub run_id: Option<String>,

    #[arg(long, value_enum, default_value_t = ProviderArg::ClaudeCli, help = "Incremental skill provider")]
    pub provider: ProviderArg,

    #[arg(long, help = "Optional provider model override")]
    pub model: Option<String>,

    #[arg(long, default_value_t = 180, help = "Provider timeout seconds")]
    pub timeout_sec: u64,

    #[arg(long, help = "Sync the incremental mechanism to the report database")]
    pub sync_report: bool,

    #[arg(long, help = "Preview only")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Incremental,
    /// Full history: the diagnose window becomes all-time.
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TestMode {
    Segmented,
    Full,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    #[value(name = "claude_cli")]
    ClaudeCli,
    #[value(name = "codex_cli")]
    CodexCli,
    #[value(name = "openai")]
    OpenAi,
    #[value(name = "anthropic")]
    Anthropic,
}

impl ProviderArg {
    pub fn to_provider(self) -> Provider {
        match self {
            ProviderArg::ClaudeCli => Provider::ClaudeCli,
            ProviderArg::CodexCli => Provider::CodexCli,
            ProviderArg::OpenAi => Provider::OpenAi,
            ProviderArg::Anthropic => Provider::Anthropic,
        }
    }

    pub fn as_str(self) -> &'static str {
        self.to_provider().as_str()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceArg {
    All,
    #[value(name = "chatgpt")]
    Chatgpt,
    #[value(name = "claude_code")]
    ClaudeCode,
    #[value(name = "codex")]
    Codex,
    #[value(name = "gemini")]
    Gemini,
    #[value(name = "claude_web")]
    ClaudeWeb,
}

impl SourceArg {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceArg::All => "all",
            SourceArg::Chatgpt => "chatgpt",
            SourceArg::ClaudeCode => "claude_code",
            SourceArg::Codex => "codex",
            SourceArg::Gemini => "gemini",
            SourceArg::ClaudeWeb => "claude_web",
        }
    }

    /// Store-level filter value: None means "all sources".
    pub fn filter_value(self) -> Option<String> {
        match self {
            SourceArg::All => None,
            other => Some(other.as_str().to_string()),
        }
    }
}
