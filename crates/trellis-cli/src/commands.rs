use std::path::Path;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::json;
use tracing::debug;
use trellis_container::{ContainerConfig, ObjectContainer};
use trellis_convert::{open_metadata, Converter, VERSION};
use trellis_refs::{Record, Value};
use trellis_store::{FileSlotStore, SlotStore};
use trellis_types::{ActivationPurpose, ObjectId};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => {
            let config = ContainerConfig::load(path)?;
            debug!(path = %path.display(), "config loaded");
            config
        }
        None => ContainerConfig::default(),
    };
    match cli.command {
        Command::Inspect(args) => cmd_inspect(&args.path, &config, cli.format),
        Command::Convert(args) => cmd_convert(&args.path, &config),
        Command::Compact(args) => cmd_compact(&args.path, &config),
        Command::Dump(args) => cmd_dump(args, &config, cli.format),
        Command::Put(args) => cmd_put(args, &config),
        Command::Delete(args) => cmd_delete(args, &config),
    }
}

fn require_store(path: &Path) -> anyhow::Result<()> {
    if !path.exists() {
        bail!("no store at {}", path.display());
    }
    Ok(())
}

fn read_only(config: &ContainerConfig) -> ContainerConfig {
    ContainerConfig {
        read_only: true,
        ..config.clone()
    }
}

fn cmd_inspect(path: &Path, config: &ContainerConfig, format: OutputFormat) -> anyhow::Result<()> {
    require_store(path)?;
    let store = FileSlotStore::open(path, read_only(config).file_store())
        .with_context(|| format!("opening {}", path.display()))?;
    let report = open_metadata(&store, &Converter::new(), true)?;
    let slots = store.ids()?.len();
    let meta = &report.metadata;

    if format == OutputFormat::Json {
        let out = json!({
            "path": path.display().to_string(),
            "file_bytes": store.file_len(),
            "live_slots": slots,
            "stored_version": report.from_version,
            "engine_version": VERSION,
            "metadata": meta,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} {}", "Store".bold(), path.display());
    println!("  File size: {} bytes", store.file_len());
    println!("  Live slots: {}", slots.to_string().bold());
    match report.from_version {
        Some(v) if v < VERSION => println!(
            "  Converter version: {} ({} to {})",
            v.to_string().yellow(),
            "needs conversion".yellow(),
            VERSION
        ),
        Some(v) => println!("  Converter version: {}", v.to_string().green()),
        None => println!("  Converter version: {}", "unstamped".dimmed()),
    }
    println!("  String encoding: {}", meta.string_encoding);
    if !meta.class_collection_id.is_null() {
        println!("  Class collection: {}", meta.class_collection_id);
    }
    for (key, value) in &meta.properties {
        println!("  {} = {}", key.cyan(), value);
    }
    Ok(())
}

fn cmd_convert(path: &Path, config: &ContainerConfig) -> anyhow::Result<()> {
    require_store(path)?;
    let store = FileSlotStore::open(path, config.file_store())?;
    let report = open_metadata(&store, &Converter::new(), false)?;
    match report.from_version {
        Some(from) if report.persisted => println!(
            "{} Converted {} from version {} to {}",
            "✓".green().bold(),
            path.display(),
            from,
            report.metadata.converter_version
        ),
        Some(from) => println!("Store already at version {}", from.to_string().green()),
        None => println!("{} Stamped new store at version {}", "✓".green().bold(), VERSION),
    }
    Ok(())
}

fn cmd_compact(path: &Path, config: &ContainerConfig) -> anyhow::Result<()> {
    require_store(path)?;
    let store = FileSlotStore::open(path, config.file_store())?;
    let report = store.compact()?;
    println!(
        "{} Compacted {}: {} -> {} bytes ({} live slots, {} reclaimed)",
        "✓".green().bold(),
        path.display(),
        report.bytes_before,
        report.bytes_after,
        report.live_slots,
        report.reclaimed().to_string().bold()
    );
    Ok(())
}

fn cmd_dump(args: DumpArgs, config: &ContainerConfig, format: OutputFormat) -> anyhow::Result<()> {
    require_store(&args.path)?;
    let db = ObjectContainer::open_file(&args.path, read_only(config))?;
    let ids = match args.id {
        Some(id) => vec![ObjectId::new(id)],
        None => db.ids()?,
    };
    let limit = args.limit.unwrap_or(usize::MAX);

    let mut rows = Vec::new();
    for id in ids.into_iter().take(limit) {
        let value = db.activate_depth(id, ActivationPurpose::Read, 0)?;
        let record = value
            .downcast_ref::<Record>()
            .with_context(|| format!("{id} is not a record"))?;
        match format {
            OutputFormat::Json => rows.push(json!({ "id": id, "record": record })),
            OutputFormat::Text => println!("{} {}", id.to_string().yellow(), record),
        }
    }
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    Ok(())
}

fn cmd_put(args: PutArgs, config: &ContainerConfig) -> anyhow::Result<()> {
    let id = put_record(&args.path, config, &args.class, &args.fields)?;
    println!(
        "{} Stored {} as {}",
        "✓".green().bold(),
        args.class.bold(),
        id.to_string().yellow()
    );
    Ok(())
}

fn cmd_delete(args: DeleteArgs, config: &ContainerConfig) -> anyhow::Result<()> {
    require_store(&args.path)?;
    let deleted = delete_object(&args.path, config, ObjectId::new(args.id), args.depth)?;
    println!("{} Deleted {} object(s)", "✓".green().bold(), deleted.len());
    for id in deleted {
        println!("  {}", id.to_string().dimmed());
    }
    Ok(())
}

fn put_record(
    path: &Path,
    config: &ContainerConfig,
    class: &str,
    fields: &[String],
) -> anyhow::Result<ObjectId> {
    let mut record = Record::new(class);
    for field in fields {
        let (name, value) = parse_field(field)?;
        record.set(name, value);
    }
    let db = ObjectContainer::open_file(path, config.clone())?;
    let mut tx = db.begin();
    let id = db.store(&mut tx, record.into())?;
    db.commit(&mut tx)?;
    Ok(id)
}

fn delete_object(
    path: &Path,
    config: &ContainerConfig,
    id: ObjectId,
    depth: u32,
) -> anyhow::Result<Vec<ObjectId>> {
    let db = ObjectContainer::open_file(path, config.clone())?;
    let mut tx = db.begin();
    let plan = db.delete(&mut tx, id, depth)?;
    db.commit(&mut tx)?;
    Ok(plan.ids().to_vec())
}

fn parse_field(spec: &str) -> anyhow::Result<(&str, Value)> {
    let Some((name, raw)) = spec.split_once('=') else {
        bail!("expected name=value, got {spec:?}");
    };
    if name.is_empty() {
        bail!("empty field name in {spec:?}");
    }
    let value = if let Some(target) = raw.strip_prefix('@') {
        let id: u64 = target
            .parse()
            .with_context(|| format!("bad object id in {spec:?}"))?;
        Value::Ref(ObjectId::new(id))
    } else if let Ok(n) = raw.parse::<i64>() {
        Value::Int(n)
    } else if let Ok(b) = raw.parse::<bool>() {
        Value::Bool(b)
    } else {
        Value::Text(raw.to_string())
    };
    Ok((name, value))
}
