use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use sis_core::error::{Result, SisError};
use sis_core::store::Candidate;
use sis_core::{
    BackupManager, CancelToken, DedupMode, DedupOutcome, Decision, DuplicateKey, FileLifecycleManager,
    ImportPipeline, ImportRequest, ImporterService, Settings, SystemClock, WorkflowOptions,
};

fn pipeline(settings: &Settings) -> Result<ImportPipeline> {
    ImportPipeline::from_settings(settings, Arc::new(SystemClock))
}

fn non_empty(v: Vec<String>) -> Option<Vec<String>> {
    if v.is_empty() { None } else { Some(v) }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).map_err(|e| SisError::Format(e.to_string()))?;
    println!("{text}");
    Ok(())
}

pub fn handle_import(
    settings: &Settings,
    json: bool,
    file: PathBuf,
    original_name: Option<String>,
    keep: Vec<String>,
) -> Result<()> {
    let mut req = ImportRequest::new(file);
    req.original_name = original_name;
    req.keep_columns = non_empty(keep);
    let report = pipeline(settings)?.process(&req, &CancelToken::new())?;
    if json {
        return print_json(&report);
    }
    println!(
        "imported {} row(s) with orderCode '{}'",
        report.rows, report.order_code
    );
    if let Some(b) = &report.backup {
        println!("backup: {}", b.display());
    }
    Ok(())
}

/// `y`/`yes` removes; anything else (including EOF) keeps.
pub(crate) fn parse_answer(line: &str) -> Decision {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Decision::Remove,
        _ => Decision::Keep,
    }
}

pub(crate) fn describe(c: &Candidate) -> String {
    let mut s = format!(
        "row {} duplicates row {}:",
        c.row + 1,
        c.first_occurrence + 1
    );
    for (col, val) in c.record.fields() {
        s.push_str(&format!("\n  {col} = {val}"));
    }
    s
}

fn ask(c: &Candidate, input: &mut impl BufRead, out: &mut impl Write) -> io::Result<Decision> {
    writeln!(out, "{}", describe(c))?;
    write!(out, "remove this row? [y/N] ")?;
    out.flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(parse_answer(&line))
}

#[derive(Serialize)]
struct DedupeSummary {
    mode: DedupMode,
    candidates: usize,
    removed: usize,
}

pub fn handle_dedupe(settings: &Settings, json: bool, mode: DedupMode, key: Vec<String>) -> Result<()> {
    let p = pipeline(settings)?;
    let summary = match mode {
        DedupMode::Forceful => {
            let removed = match p.remove_duplicates(DedupMode::Forceful)? {
                DedupOutcome::Removed(n) => n,
                DedupOutcome::Review(_) => 0,
            };
            DedupeSummary {
                mode,
                candidates: removed,
                removed,
            }
        }
        DedupMode::Soft => {
            let key = match non_empty(key) {
                Some(cols) => DuplicateKey::Columns(cols),
                None => DuplicateKey::FullRow,
            };
            let mut review = p.begin_review(&key)?;
            let candidates = review.total();
            let stdin = io::stdin();
            let mut input = stdin.lock();
            let mut out = io::stderr().lock();
            while let Some(c) = review.current() {
                let decision = ask(&c, &mut input, &mut out)?;
                review.decide(decision)?;
            }
            DedupeSummary {
                mode,
                candidates,
                removed: p.commit_review(review)?,
            }
        }
    };
    if json {
        return print_json(&summary);
    }
    println!(
        "{} duplicate row(s) removed ({} candidate(s))",
        summary.removed, summary.candidates
    );
    Ok(())
}

pub fn handle_export(settings: &Settings, json: bool, out: PathBuf, columns: Vec<String>) -> Result<()> {
    let columns = non_empty(columns);
    let report = pipeline(settings)?.export(&out, columns.as_deref())?;
    if json {
        return print_json(&report);
    }
    if !report.written {
        println!("central store is empty, nothing written");
        return Ok(());
    }
    println!("wrote {} row(s) to {}", report.rows, report.path.display());
    if !report.dropped.is_empty() {
        println!("ignored unknown column(s): {}", report.dropped.join(", "));
    }
    Ok(())
}

#[derive(Serialize)]
struct BackupLine {
    path: PathBuf,
    size: u64,
    sha256: Option<String>,
}

pub fn handle_backup(settings: &Settings, json: bool) -> Result<()> {
    let backups = BackupManager::from_settings(settings, Arc::new(SystemClock))?;
    let created = backups.backup()?.map(|b| BackupLine {
        sha256: Some(b.hash_hex()),
        path: b.path,
        size: b.size,
    });
    if json {
        return print_json(&created);
    }
    match created {
        Some(b) => println!(
            "{} ({} bytes, sha256 {})",
            b.path.display(),
            b.size,
            b.sha256.unwrap_or_default()
        ),
        None => println!("no central store yet, nothing to back up"),
    }
    Ok(())
}

pub fn handle_prune(settings: &Settings, json: bool, days: Option<u32>) -> Result<()> {
    let backups = BackupManager::from_settings(settings, Arc::new(SystemClock))?;
    let report = match days {
        Some(d) => backups.prune_days(d)?,
        None => backups.prune(settings.backup_retention)?,
    };
    if json {
        return print_json(&report);
    }
    println!(
        "deleted {} backup(s), freed {:.2} MB",
        report.deleted,
        report.freed_bytes as f64 / 1024.0 / 1024.0
    );
    Ok(())
}

pub fn handle_backups(settings: &Settings, json: bool) -> Result<()> {
    let backups = BackupManager::from_settings(settings, Arc::new(SystemClock))?;
    let lines: Vec<BackupLine> = backups
        .list()?
        .into_iter()
        .map(|b| BackupLine {
            path: b.path,
            size: b.size,
            sha256: None,
        })
        .collect();
    if json {
        return print_json(&lines);
    }
    for b in &lines {
        println!("{:>12}  {}", b.size, b.path.display());
    }
    Ok(())
}

pub fn handle_workflow(
    settings: &Settings,
    json: bool,
    files: Vec<PathBuf>,
    keep: Vec<String>,
    no_dedup: bool,
    columns: Vec<String>,
) -> Result<()> {
    let svc = ImporterService::from_settings(settings, Arc::new(SystemClock))?;
    let mut uploads = Vec::with_capacity(files.len());
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        uploads.push((name, std::fs::read(path)?));
    }
    let opts = WorkflowOptions {
        keep_columns: non_empty(keep),
        remove_duplicates: !no_dedup,
        export_columns: non_empty(columns),
    };
    let report = svc.run_workflow(uploads, &opts, &CancelToken::new());
    if json {
        print_json(&report)?;
    } else {
        for f in &report.processed {
            println!("{}: {} row(s) -> {}", f.name, f.rows, f.download.path.display());
        }
        for e in &report.errors {
            eprintln!("{}: {}", e.name, e.reason);
        }
    }
    if report.succeeded() {
        Ok(())
    } else {
        Err(SisError::Validation(format!(
            "no file was processed ({} failed)",
            report.errors.len()
        )))
    }
}

pub fn handle_status(settings: &Settings, json: bool) -> Result<()> {
    let svc = ImporterService::from_settings(settings, Arc::new(SystemClock))?;
    let files = svc.all_statuses();
    if json {
        #[derive(Serialize)]
        struct Status<'a, T: Serialize> {
            files: &'a [T],
            stats: sis_core::stats::FileStats,
        }
        return print_json(&Status {
            files: files.as_slice(),
            stats: svc.files().stats(),
        });
    }
    for f in &files {
        println!(
            "{}  {:<12} {:>3}%  {}",
            f.id, f.status, f.progress, f.original_name
        );
    }
    let s = svc.files().stats();
    println!("{} file(s), {} bytes, {} live download(s)", s.total_files, s.total_bytes, s.downloads);
    Ok(())
}

pub fn handle_sweep(settings: &Settings, json: bool) -> Result<()> {
    let files = FileLifecycleManager::open(settings, Arc::new(SystemClock))?;
    let report = files.sweep_expired(&CancelToken::new())?;
    if json {
        return print_json(&report);
    }
    println!(
        "removed {} download(s), {} upload(s), {} processed file(s); freed {} bytes",
        report.downloads, report.uploads, report.processed, report.freed_bytes
    );
    for f in &report.failures {
        eprintln!("could not delete {}: {}", f.path.display(), f.error);
    }
    Ok(())
}
