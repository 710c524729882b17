use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum, ValueHint};
use is_terminal::IsTerminal;
use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

mod apply;
mod diff;
mod encoding;
mod hunk;
mod lines;
mod logging;
mod manifest;

use apply::{ApplyOutcome, DEFAULT_MAX_OFFSET, apply_hunks};
use encoding::{DecodedText, EncodingStrategy, encode_text, looks_binary};
use hunk::{Hunk, parse_patch};
use logging::record_change;
use manifest::load_plan;

#[derive(Clone, Copy, Debug, ValueEnum, PartialEq, Eq, Default)]
enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

impl ColorChoice {
    fn should_color(self) -> bool {
        match self {
            ColorChoice::Always => true,
            ColorChoice::Never => false,
            ColorChoice::Auto => io::stdout().is_terminal(),
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Apply(cmd) => handle_apply(cmd),
        Command::Inspect(cmd) => handle_inspect(cmd),
        Command::Batch(cmd) => handle_batch(cmd),
        Command::Log(cmd) => handle_log(cmd),
    }
}

fn handle_apply(cmd: ApplyCommand) -> Result<()> {
    let encoding = EncodingStrategy::new(cmd.common.encoding.as_deref())?;
    print_command_summary(
        "apply",
        &cmd.common,
        &encoding,
        &[
            format!("patches: {}", format_paths(&cmd.patch_files)),
            format!("target: {}", cmd.target.display()),
        ],
    );

    let mut apply_all = cmd.common.auto_apply && cmd.common.apply;
    let mut stats = CommandStats::default();
    let ctx = StepContext {
        common: &cmd.common,
        command: "apply",
        encoding,
        patch_files: cmd.patch_files.clone(),
        target: cmd.target.clone(),
        max_offset: cmd.common.max_offset,
    };
    let outcome = run_patch_step(&ctx, &mut apply_all, &mut stats)?;
    stats.print("apply");
    if outcome.failed_hunks > 0 {
        bail!(
            "{} of {} hunk(s) found no matching context in {}",
            outcome.failed_hunks,
            outcome.total_hunks,
            cmd.target.display()
        );
    }
    Ok(())
}

fn handle_batch(cmd: BatchCommand) -> Result<()> {
    let plan = load_plan(&cmd.plan)?;
    let base_encoding = EncodingStrategy::new(cmd.common.encoding.as_deref())?;
    print_command_summary(
        "batch",
        &cmd.common,
        &base_encoding,
        &[
            format!("plan: {}", cmd.plan.display()),
            format!("steps: {}", plan.steps.len()),
        ],
    );

    let mut apply_all = cmd.common.auto_apply && cmd.common.apply;
    let mut stats = CommandStats::default();
    let mut failed_total = 0usize;
    for (idx, step) in plan.steps.iter().enumerate() {
        println!(
            "--- step {}/{}: {} -> {} ---",
            idx + 1,
            plan.steps.len(),
            step.label(),
            step.target.display()
        );
        let encoding =
            EncodingStrategy::new(step.encoding.as_deref().or(cmd.common.encoding.as_deref()))?;
        let ctx = StepContext {
            common: &cmd.common,
            command: "batch",
            encoding,
            patch_files: vec![step.patch.clone()],
            target: step.target.clone(),
            max_offset: step.max_offset.unwrap_or(cmd.common.max_offset),
        };
        let outcome = run_patch_step(&ctx, &mut apply_all, &mut stats)?;
        failed_total += outcome.failed_hunks;
        if outcome.quit {
            break;
        }
    }
    stats.print("batch");
    if failed_total > 0 {
        bail!("{failed_total} hunk(s) found no matching context");
    }
    Ok(())
}

fn handle_inspect(cmd: InspectCommand) -> Result<()> {
    for path in &cmd.patch_files {
        let hunks = load_hunks(path)?;
        println!("{}: {} hunk(s)", path.display(), hunks.len());
        for (idx, hunk) in hunks.iter().enumerate() {
            println!(
                "  hunk {}: -{},{} +{},{}",
                idx + 1,
                hunk.original_start,
                hunk.original_lines.len(),
                hunk.new_start,
                hunk.new_lines.len()
            );
            if cmd.body {
                print!("{hunk}");
            }
        }
    }
    Ok(())
}

fn handle_log(cmd: LogCommand) -> Result<()> {
    let entries = logging::read_recent(cmd.limit)?;
    if entries.is_empty() {
        println!("no recorded changes.");
        return Ok(());
    }
    match ReportFormat::from_str(&cmd.format)? {
        ReportFormat::Table => {
            for entry in entries {
                println!(
                    "{} {} {} ({}) [{}]",
                    entry.timestamp,
                    entry.command,
                    entry.target.display(),
                    entry.action,
                    entry.hunks
                );
            }
        }
        ReportFormat::Json => {
            for entry in entries {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
    }
    Ok(())
}

struct StepContext<'a> {
    common: &'a CommonArgs,
    command: &'a str,
    encoding: EncodingStrategy,
    patch_files: Vec<PathBuf>,
    target: PathBuf,
    max_offset: usize,
}

struct StepOutcome {
    quit: bool,
    total_hunks: usize,
    failed_hunks: usize,
}

fn run_patch_step(
    ctx: &StepContext<'_>,
    apply_all: &mut bool,
    stats: &mut CommandStats,
) -> Result<StepOutcome> {
    let bytes =
        fs::read(&ctx.target).with_context(|| format!("reading {}", ctx.target.display()))?;
    if looks_binary(&bytes) {
        bail!(
            "{} looks like a binary file; refusing to patch",
            ctx.target.display()
        );
    }
    let decoded = ctx.encoding.decode(&bytes);
    if decoded.had_errors {
        println!(
            "warning: decoding errors encountered for {}; continuing",
            ctx.target.display()
        );
    }

    let mut working = decoded.text.clone();
    let mut total = 0usize;
    let mut applied_count = 0usize;
    let mut outcomes = Vec::new();
    for patch_path in &ctx.patch_files {
        let hunks = load_hunks(patch_path)?;
        if hunks.is_empty() {
            println!("{}: no hunks found", patch_path.display());
            continue;
        }
        let ApplyOutcome { text, applied } = apply_hunks(&working, &hunks, ctx.max_offset);
        working = text;
        for (idx, ok) in applied.iter().enumerate() {
            println!(
                "  {}#{}: {}",
                patch_path.display(),
                idx + 1,
                if *ok { "applied" } else { "no matching context" }
            );
        }
        total += applied.len();
        applied_count += applied.iter().filter(|ok| **ok).count();
        outcomes.extend(applied);
    }
    let failed = total - applied_count;
    let hunk_summary = format!("{applied_count}/{total} applied");
    let done = |quit| StepOutcome {
        quit,
        total_hunks: total,
        failed_hunks: failed,
    };

    if working == decoded.text {
        println!("no changes for {}", ctx.target.display());
        stats.no_op += 1;
        record_change(ctx.command, &ctx.target, "no-op", &hunk_summary)?;
        emit_json_row(ctx, "no-op", total, applied_count, &outcomes)?;
        return Ok(done(false));
    }

    if !ctx.common.json {
        let line_summary = diff::summarize_lines(&decoded.text, &working);
        println!(
            "--- preview: {} ({line_summary} lines) ---",
            ctx.target.display()
        );
        let config = diff::DiffDisplayConfig {
            context: ctx.common.context,
            colorize: ctx.common.color.should_color(),
        };
        diff::display_diff(&decoded.text, &working, &config)?;
    }

    if !ctx.common.apply {
        println!("dry-run: rerun with --apply to write this change.");
        stats.dry_run += 1;
        record_change(ctx.command, &ctx.target, "dry-run", &hunk_summary)?;
        emit_json_row(ctx, "dry-run", total, applied_count, &outcomes)?;
        return Ok(done(false));
    }

    let decision = if *apply_all {
        ApprovalDecision::Apply
    } else {
        prompt_approval(&ctx.target)?
    };
    match decision {
        ApprovalDecision::Apply | ApprovalDecision::ApplyAll => {
            if matches!(decision, ApprovalDecision::ApplyAll) {
                *apply_all = true;
            }
            write_patched_file(ctx, &decoded, &working)?;
            stats.applied += 1;
            record_change(ctx.command, &ctx.target, "applied", &hunk_summary)?;
            emit_json_row(ctx, "applied", total, applied_count, &outcomes)?;
            Ok(done(false))
        }
        ApprovalDecision::Skip => {
            println!("skipped {}", ctx.target.display());
            stats.skipped += 1;
            record_change(ctx.command, &ctx.target, "skipped", &hunk_summary)?;
            emit_json_row(ctx, "skipped", total, applied_count, &outcomes)?;
            Ok(done(false))
        }
        ApprovalDecision::Quit => {
            println!("stopping after user request.");
            stats.skipped += 1;
            Ok(done(true))
        }
    }
}

// Patch files themselves are always auto-detected; --encoding only governs the
// target file.
fn load_hunks(path: &Path) -> Result<Vec<Hunk>> {
    let bytes = fs::read(path).with_context(|| format!("reading patch {}", path.display()))?;
    let decoded = EncodingStrategy::default().decode(&bytes);
    parse_patch(&decoded.text).with_context(|| format!("parsing patch {}", path.display()))
}

fn write_patched_file(ctx: &StepContext<'_>, decoded: &DecodedText, new_text: &str) -> Result<()> {
    if let Some(dir) = ctx.common.undo_dir.as_deref() {
        write_undo_patch(dir, &ctx.target, &decoded.text, new_text, ctx.common.context)?;
    }
    let (encoded, had_errors) = encode_text(new_text, decoded.encoding);
    if had_errors {
        println!(
            "warning: encoding fallback occurred when writing {}; output may be lossy",
            ctx.target.display()
        );
    }
    let backup = create_backup_if_needed(&ctx.target, ctx.common.no_backup)?;
    write_via_temp(&ctx.target, encoded.as_ref())
        .with_context(|| format!("writing {}", ctx.target.display()))?;
    if let Some(bak) = backup {
        println!(
            "backup saved: {} -> {}",
            ctx.target.display(),
            bak.display()
        );
    }
    println!("applied {}", ctx.target.display());
    Ok(())
}

// The undo patch is a reverse diff, so it can be fed back to `apply`.
fn write_undo_patch(
    dir: &Path,
    target: &Path,
    old_text: &str,
    new_text: &str,
    context: usize,
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("creating undo dir {}", dir.display()))?;
    let timestamp = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| "unknown".into());
    let file_name = format!("{timestamp}_{}.patch", sanitize_path(target));
    let patch_path = dir.join(file_name);
    let mut text = format!("--- {}\n+++ {}\n", target.display(), target.display());
    for hunk in diff::diff_hunks(new_text, old_text, context) {
        text.push_str(&hunk.to_string());
    }
    fs::write(&patch_path, text)
        .with_context(|| format!("writing undo patch {}", patch_path.display()))?;
    Ok(())
}

fn sanitize_path(path: &Path) -> String {
    path.display()
        .to_string()
        .chars()
        .map(|ch| match ch {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => ch,
        })
        .collect()
}

fn create_backup_if_needed(path: &Path, no_backup: bool) -> Result<Option<PathBuf>> {
    if no_backup || !path.exists() {
        return Ok(None);
    }

    let mut attempt = 0usize;
    loop {
        let candidate = backup_candidate(path, attempt);
        if !candidate.exists() {
            fs::copy(path, &candidate)
                .with_context(|| format!("creating backup {}", candidate.display()))?;
            return Ok(Some(candidate));
        }
        attempt += 1;
    }
}

fn backup_candidate(path: &Path, index: usize) -> PathBuf {
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("driftpatch_file");
    let suffix = if index == 0 {
        ".bak".to_string()
    } else {
        format!(".bak{index}")
    };
    path.with_file_name(format!("{name}{suffix}"))
}

fn write_via_temp(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(dir) = parent {
        fs::create_dir_all(dir).with_context(|| format!("creating directory {}", dir.display()))?;
    }
    let base_dir = parent.unwrap_or_else(|| Path::new("."));
    let unique = format!(
        ".driftpatch-tmp-{}-{}",
        std::process::id(),
        OffsetDateTime::now_utc().unix_timestamp_nanos()
    );
    let temp_path = base_dir.join(unique);
    {
        let mut file = fs::File::create(&temp_path)
            .with_context(|| format!("creating temp file {}", temp_path.display()))?;
        file.write_all(data)
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.sync_all()
            .with_context(|| format!("syncing temp file {}", temp_path.display()))?;
    }
    fs::rename(&temp_path, path).or_else(|err| {
        let _ = fs::remove_file(&temp_path);
        Err(err).with_context(|| format!("replacing {}", path.display()))
    })?;
    Ok(())
}

#[derive(Serialize)]
struct StepJsonRow<'a> {
    command: &'a str,
    target: String,
    action: &'a str,
    hunks_total: usize,
    hunks_applied: usize,
    outcomes: &'a [bool],
}

fn emit_json_row(
    ctx: &StepContext<'_>,
    action: &str,
    total: usize,
    applied: usize,
    outcomes: &[bool],
) -> Result<()> {
    if !ctx.common.json {
        return Ok(());
    }
    let row = StepJsonRow {
        command: ctx.command,
        target: ctx.target.display().to_string(),
        action,
        hunks_total: total,
        hunks_applied: applied,
        outcomes,
    };
    println!("{}", serde_json::to_string(&row)?);
    Ok(())
}

fn print_command_summary(
    command: &str,
    common: &CommonArgs,
    encoding: &EncodingStrategy,
    details: &[String],
) {
    println!("driftpatch {command}");
    println!(
        "  mode: {}",
        if common.apply { "apply" } else { "dry-run" }
    );
    println!("  encoding: {}", encoding.describe());
    println!("  max-offset: {}", common.max_offset);
    for detail in details {
        println!("  {detail}");
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Default)]
struct CommandStats {
    applied: usize,
    skipped: usize,
    dry_run: usize,
    no_op: usize,
}

impl CommandStats {
    fn print(&self, label: &str) {
        let total = self.applied + self.skipped + self.dry_run + self.no_op;
        if total == 0 {
            return;
        }
        println!(
            "{label} summary: applied={}, skipped={}, dry-run={}, no-op={}",
            self.applied, self.skipped, self.dry_run, self.no_op
        );
    }
}

#[derive(Debug, Clone, Copy)]
enum ApprovalDecision {
    Apply,
    Skip,
    ApplyAll,
    Quit,
}

fn prompt_approval(path: &Path) -> Result<ApprovalDecision> {
    loop {
        print_prompt(&format!(
            "Apply change to {}? [y]es/[n]o/[a]ll/[q]uit: ",
            path.display()
        ))?;
        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        match input.trim().to_lowercase().as_str() {
            "y" | "yes" | "" => return Ok(ApprovalDecision::Apply),
            "n" | "no" => return Ok(ApprovalDecision::Skip),
            "a" | "all" => return Ok(ApprovalDecision::ApplyAll),
            "q" | "quit" => return Ok(ApprovalDecision::Quit),
            _ => {
                println!("Please enter y, n, a, or q.");
            }
        }
    }
}

fn print_prompt(message: &str) -> Result<()> {
    print!("{message}");
    io::stdout().flush()?;
    Ok(())
}

#[derive(Clone, Copy)]
enum ReportFormat {
    Table,
    Json,
}

impl ReportFormat {
    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(anyhow!(
                "unsupported format '{other}' (expected table or json)"
            )),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    name = "driftpatch",
    version,
    about = "Fuzzy unified-diff patching for files whose line numbers have drifted"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Apply(ApplyCommand),
    Inspect(InspectCommand),
    Batch(BatchCommand),
    Log(LogCommand),
}

#[derive(Debug, Clone, Args)]
struct CommonArgs {
    #[arg(long, value_name = "ENCODING")]
    encoding: Option<String>,
    #[arg(long, action = ArgAction::SetTrue)]
    apply: bool,
    #[arg(long = "yes", action = ArgAction::SetTrue)]
    auto_apply: bool,
    #[arg(long, action = ArgAction::SetTrue)]
    no_backup: bool,
    #[arg(long, default_value_t = 3)]
    context: usize,
    #[arg(long = "max-offset", value_name = "LINES", default_value_t = DEFAULT_MAX_OFFSET)]
    max_offset: usize,
    #[arg(long = "color", value_enum, default_value = "auto")]
    color: ColorChoice,
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,
    #[arg(long = "undo-dir", value_name = "DIR", value_hint = ValueHint::DirPath)]
    undo_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ApplyCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(
        long = "patch",
        value_name = "FILE",
        value_hint = ValueHint::FilePath,
        required = true,
        action = ArgAction::Append
    )]
    patch_files: Vec<PathBuf>,
    #[arg(long = "target", value_name = "FILE", value_hint = ValueHint::FilePath)]
    target: PathBuf,
}

#[derive(Debug, Args)]
struct InspectCommand {
    #[arg(
        long = "patch",
        value_name = "FILE",
        value_hint = ValueHint::FilePath,
        required = true,
        action = ArgAction::Append
    )]
    patch_files: Vec<PathBuf>,
    #[arg(long, action = ArgAction::SetTrue)]
    body: bool,
}

#[derive(Debug, Args)]
struct BatchCommand {
    #[command(flatten)]
    common: CommonArgs,
    #[arg(long = "plan", value_name = "FILE", value_hint = ValueHint::FilePath)]
    plan: PathBuf,
}

#[derive(Debug, Args)]
struct LogCommand {
    #[arg(long, default_value_t = 20)]
    limit: usize,
    #[arg(long = "format", default_value = "table")]
    format: String,
}

#[cfg(test)]
mod write_tests {
    use super::*;

    #[test]
    fn write_via_temp_replaces_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("file.txt");
        fs::write(&path, "before").expect("seed file");
        write_via_temp(&path, b"after").expect("write succeeds");
        assert_eq!(fs::read_to_string(&path).expect("read back"), "after");
    }

    #[test]
    fn backups_get_incrementing_suffixes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conf.lua");
        fs::write(&path, "v1").expect("seed file");

        let first = create_backup_if_needed(&path, false)
            .expect("backup succeeds")
            .expect("backup created");
        assert!(first.ends_with("conf.lua.bak"));

        let second = create_backup_if_needed(&path, false)
            .expect("backup succeeds")
            .expect("backup created");
        assert!(second.ends_with("conf.lua.bak1"));
    }

    #[test]
    fn no_backup_flag_skips_the_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("conf.lua");
        fs::write(&path, "v1").expect("seed file");
        let backup = create_backup_if_needed(&path, true).expect("check succeeds");
        assert!(backup.is_none());
    }

    #[test]
    fn sanitize_flattens_separators() {
        assert_eq!(sanitize_path(Path::new("a/b\\c:d.lua")), "a_b_c_d.lua");
    }
}

#[cfg(test)]
mod report_format_tests {
    use super::ReportFormat;

    #[test]
    fn accepts_known_formats_case_insensitively() {
        assert!(matches!(
            ReportFormat::from_str("Table"),
            Ok(ReportFormat::Table)
        ));
        assert!(matches!(
            ReportFormat::from_str("json"),
            Ok(ReportFormat::Json)
        ));
    }

    #[test]
    fn rejects_unknown_formats() {
        assert!(ReportFormat::from_str("xml").is_err());
    }
}
