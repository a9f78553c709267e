use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use ratings_core::chart::{average_score_series, count_series, split_into_buckets, TimeUnit};
use ratings_core::query::{
    build_criteria, filter_records, sort_records, CriterionKind, OptionValue, QueryOptions,
};
use ratings_core::report::{author_totals, dedup_by_author};
use ratings_core::{time_period, ConflictPolicy, OperationGate, Record, ReactionMap, Store};
use ratings_snapshot::{
    read_store_file, write_store_file, SnapshotStore, WriteFilter, WriteMethod,
};
use serde::Deserialize;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, Time};

mod decode;
mod render;

const CLI_CONTRACT_VERSION: &str = "ratings-cli.v1";
const DEFAULT_BAR_WIDTH: usize = 30;
const MIN_BAR_WIDTH: usize = 4;
const MAX_BAR_WIDTH: usize = 60;

/// Criterion sets per command, in the order their filters and sort
/// keys apply.
const SHOW_CRITERIA: &[CriterionKind] = &[
    CriterionKind::Jury,
    CriterionKind::Author,
    CriterionKind::Date,
    CriterionKind::GradeCount,
    CriterionKind::AverageScore,
    CriterionKind::IndividualScore,
    CriterionKind::Unity,
    CriterionKind::Special,
];
const POSTER_CRITERIA: &[CriterionKind] = &[
    CriterionKind::Jury,
    CriterionKind::Date,
    CriterionKind::GradeCount,
    CriterionKind::Special,
];
const GRAPH_CRITERIA: &[CriterionKind] = &[
    CriterionKind::Jury,
    CriterionKind::Author,
    CriterionKind::Date,
    CriterionKind::GradeCount,
    CriterionKind::AverageScore,
    CriterionKind::IndividualScore,
    CriterionKind::Special,
];

#[derive(Debug, Parser)]
#[command(name = "ratings")]
#[command(about = "Ratings archive CLI")]
struct Cli {
    /// JSON configuration: reaction map and snapshot directory.
    #[arg(long, default_value = "./ratings.config.json")]
    config: PathBuf,

    /// Live store file persisted between invocations.
    #[arg(long, default_value = "./ratings.store.json")]
    store: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a captured batch and add its records to a channel.
    Import(ImportArgs),
    /// List stored records ordered by the active criteria.
    Show(ShowArgs),
    /// Per-author leaderboards.
    Poster(PosterArgs),
    /// Time-bucketed text chart.
    Graph(GraphArgs),
    /// Per-channel counts and time periods of the live store.
    Status,
    /// Drop every stored record.
    Clear,
    Snapshot {
        #[command(subcommand)]
        command: SnapshotCommand,
    },
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long)]
    channel_id: String,
    #[arg(long)]
    channel_name: String,
    /// Captured message stubs, a JSON array.
    #[arg(long)]
    file: PathBuf,
    /// Keep an already-stored record when the batch carries the same id.
    #[arg(long, default_value_t = false)]
    keep_old: bool,
    /// Only import stubs posted at or after this moment.
    #[arg(long, value_parser = parse_moment)]
    date0: Option<OffsetDateTime>,
    /// Only import stubs posted at or before this moment.
    #[arg(long, value_parser = parse_moment)]
    date1: Option<OffsetDateTime>,
}

#[derive(Debug, Args)]
struct ShowArgs {
    #[arg(long)]
    channel: String,
    /// How many records to print.
    #[arg(long, default_value_t = 10)]
    count: usize,
    #[arg(long, value_enum, default_value_t = ShowMethod::Best)]
    method: ShowMethod,
    /// 1-based position to start from after ordering.
    #[arg(long, default_value_t = 1)]
    index0: usize,
    #[command(flatten)]
    criteria: CriteriaArgs,
}

#[derive(Debug, Args)]
struct PosterArgs {
    #[arg(long)]
    channel: String,
    #[arg(long, default_value_t = 10)]
    count: usize,
    #[arg(long, value_enum, default_value_t = PosterMethod::BestPost)]
    method: PosterMethod,
    #[command(flatten)]
    criteria: CriteriaArgs,
}

#[derive(Debug, Args)]
struct GraphArgs {
    #[arg(long)]
    channel: String,
    #[arg(long, value_enum, default_value_t = GraphParam::AverageRating)]
    param: GraphParam,
    #[arg(long, default_value = "month", value_parser = parse_time_unit)]
    time_unit: TimeUnit,
    /// Bar width in characters.
    #[arg(long, default_value_t = DEFAULT_BAR_WIDTH)]
    barwidth: usize,
    #[command(flatten)]
    criteria: CriteriaArgs,
}

/// Options shared by every querying command; each command consumes
/// the subset its criterion set declares and ignores the rest.
#[derive(Debug, Args)]
struct CriteriaArgs {
    /// Time period start (RFC 3339 or YYYY-MM-DD).
    #[arg(long, value_parser = parse_moment)]
    date0: Option<OffsetDateTime>,
    /// Time period end.
    #[arg(long, value_parser = parse_moment)]
    date1: Option<OffsetDateTime>,
    /// Post author tag.
    #[arg(long)]
    author: Option<String>,
    /// Minimum amount of grades per post.
    #[arg(long)]
    grade_amount0: Option<i64>,
    /// Maximum amount of grades per post.
    #[arg(long)]
    grade_amount1: Option<i64>,
    /// Minimum average score.
    #[arg(long)]
    score_range0: Option<f64>,
    /// Maximum average score.
    #[arg(long)]
    score_range1: Option<f64>,
    /// Minimum individual grade.
    #[arg(long)]
    grade_range0: Option<f64>,
    /// Maximum individual grade.
    #[arg(long)]
    grade_range1: Option<f64>,
    /// Voter whose grades replace the averages.
    #[arg(long)]
    jury: Option<String>,
    /// Restrict to posts marked (or not marked) special.
    #[arg(long)]
    special: Option<bool>,
    /// Drop posts whose grades deviate from their average by this or more.
    #[arg(long)]
    scatter: Option<f64>,
}

impl CriteriaArgs {
    fn to_options(&self) -> QueryOptions {
        let mut opts = QueryOptions::new();
        if let Some(moment) = self.date0 {
            opts.set("date0", OptionValue::Date(moment));
        }
        if let Some(moment) = self.date1 {
            opts.set("date1", OptionValue::Date(moment));
        }
        if let Some(tag) = &self.author {
            opts.set("author", OptionValue::User(tag.clone()));
        }
        if let Some(amount) = self.grade_amount0 {
            opts.set("grade_amount0", OptionValue::Integer(amount));
        }
        if let Some(amount) = self.grade_amount1 {
            opts.set("grade_amount1", OptionValue::Integer(amount));
        }
        if let Some(score) = self.score_range0 {
            opts.set("score_range0", OptionValue::Float(score));
        }
        if let Some(score) = self.score_range1 {
            opts.set("score_range1", OptionValue::Float(score));
        }
        if let Some(grade) = self.grade_range0 {
            opts.set("grade_range0", OptionValue::Float(grade));
        }
        if let Some(grade) = self.grade_range1 {
            opts.set("grade_range1", OptionValue::Float(grade));
        }
        if let Some(tag) = &self.jury {
            opts.set("jury", OptionValue::User(tag.clone()));
        }
        if let Some(special) = self.special {
            opts.set("special", OptionValue::Boolean(special));
        }
        if let Some(scatter) = self.scatter {
            opts.set("scatter", OptionValue::Float(scatter));
        }
        opts
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ShowMethod {
    Best,
    Worst,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PosterMethod {
    /// Highest-scored single posts, one per author.
    BestPost,
    /// Lowest-scored single posts, one per author.
    WorstPost,
    /// Highest per-author averages over all matching posts.
    BestTotal,
    /// Lowest per-author averages over all matching posts.
    WorstTotal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum GraphParam {
    AverageRating,
    Count,
}

#[derive(Debug, Subcommand)]
enum SnapshotCommand {
    /// Tracked snapshot entries, name-ordered.
    List,
    /// Merge a snapshot's records into the live store.
    Read(SnapshotReadArgs),
    /// Persist the live store (optionally restricted) under a name.
    Write(SnapshotWriteArgs),
    /// Delete a snapshot entry.
    Remove(SnapshotRemoveArgs),
}

#[derive(Debug, Args)]
struct SnapshotReadArgs {
    #[arg(long)]
    name: String,
    /// Replace clashing records instead of keeping the later capture.
    #[arg(long, default_value_t = false)]
    overwrite: bool,
}

#[derive(Debug, Args)]
struct SnapshotWriteArgs {
    #[arg(long)]
    name: String,
    #[arg(long, default_value = "new", value_parser = parse_write_method)]
    method: WriteMethod,
    /// Only write records posted at or after this moment.
    #[arg(long, value_parser = parse_moment)]
    date0: Option<OffsetDateTime>,
    /// Only write records posted at or before this moment.
    #[arg(long, value_parser = parse_moment)]
    date1: Option<OffsetDateTime>,
    /// Only write this channel.
    #[arg(long)]
    channel: Option<String>,
}

#[derive(Debug, Args)]
struct SnapshotRemoveArgs {
    #[arg(long)]
    name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Config {
    data_dir: Option<PathBuf>,
    reaction_map: ReactionMap,
}

impl Config {
    fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let body = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        serde_json::from_str(&body).with_context(|| format!("parsing config {}", path.display()))
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("./snapshots"))
    }
}

fn parse_moment(value: &str) -> Result<OffsetDateTime, String> {
    if let Ok(moment) = OffsetDateTime::parse(value, &Rfc3339) {
        return Ok(moment);
    }
    let date_only = format_description!("[year]-[month]-[day]");
    Date::parse(value, &date_only)
        .map(|date| date.with_time(Time::MIDNIGHT).assume_utc())
        .map_err(|_| format!("'{value}' is neither RFC 3339 nor YYYY-MM-DD"))
}

fn parse_time_unit(value: &str) -> Result<TimeUnit, String> {
    TimeUnit::parse(value).ok_or_else(|| format!("'{value}' is not one of day, week, month"))
}

fn parse_write_method(value: &str) -> Result<WriteMethod, String> {
    WriteMethod::parse(value)
        .ok_or_else(|| format!("'{value}' is not one of new, overwrite, update"))
}

fn load_live(path: &Path) -> Result<Store> {
    if !path.exists() {
        return Ok(Store::new());
    }
    read_store_file(path).with_context(|| format!("reading store {}", path.display()))
}

fn save_live(path: &Path, store: &Store) -> Result<()> {
    write_store_file(path, store).with_context(|| format!("writing store {}", path.display()))
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    // One operation at a time; concurrent invocations sharing this
    // process would be rejected with Busy instead of interleaving.
    let gate = OperationGate::new();
    let _running = gate.try_acquire()?;
    run(cli)
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    match cli.command {
        Command::Import(args) => run_import(&args, &cli.store, &config),
        Command::Show(args) => run_show(&args, &cli.store),
        Command::Poster(args) => run_poster(&args, &cli.store),
        Command::Graph(args) => run_graph(&args, &cli.store),
        Command::Status => run_status(&cli.store),
        Command::Clear => run_clear(&cli.store),
        Command::Snapshot { command } => run_snapshot(command, &cli.store, &config),
    }
}

fn run_import(args: &ImportArgs, store_path: &Path, config: &Config) -> Result<()> {
    let body = fs::read_to_string(&args.file)
        .with_context(|| format!("reading batch {}", args.file.display()))?;
    let mut stubs: Vec<decode::RecordStub> = serde_json::from_str(&body)
        .with_context(|| format!("parsing batch {}", args.file.display()))?;
    if args.date0.is_some() || args.date1.is_some() {
        let from = args.date0.unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let to = args.date1.unwrap_or_else(OffsetDateTime::now_utc);
        stubs.retain(|stub| stub.date >= from && stub.date <= to);
    }
    let batch = decode::decode_batch(&config.reaction_map, stubs, OffsetDateTime::now_utc());
    let policy =
        if args.keep_old { ConflictPolicy::KeepExisting } else { ConflictPolicy::TakeNew };

    let mut live = load_live(store_path)?;
    let imported = batch.records.len();
    for record in batch.records {
        live.insert(&args.channel_id, &args.channel_name, record, policy);
    }
    save_live(store_path, &live)?;
    tracing::info!(channel = %args.channel_name, imported, unrated = batch.unrated, "batch imported");
    emit_json(json!({
        "channel": args.channel_name,
        "imported": imported,
        "unrated": batch.unrated,
        "total": live.record_count(),
    }))
}

fn record_row(position: usize, record: &Record, jury: Option<&str>) -> Value {
    json!({
        "position": position,
        "id": record.id,
        "author": record.author.tag,
        "score": record.score_for(jury),
        "score_text": record.score_for(jury).map(render::show_score),
        "grades": record.score.count(),
        "special": record.is_special(),
        "posted_at": render::show_date(record.posted_at),
        "content": record.body,
        "attachments": record.media,
        "url": record.source_url,
    })
}

fn run_show(args: &ShowArgs, store_path: &Path) -> Result<()> {
    let live = load_live(store_path)?;
    let opts = args.criteria.to_options();
    let criteria = build_criteria(SHOW_CRITERIA, &opts);
    let mut records = filter_records(&criteria, live.records_of(&args.channel));
    if records.is_empty() {
        return emit_json(json!({
            "results": [],
            "message": "no stored records meet the constraints",
        }));
    }
    sort_records(&criteria, &mut records);
    if args.method == ShowMethod::Best {
        records.reverse();
    }
    let jury = args.criteria.jury.as_deref();
    let first = args.index0.max(1) - 1;
    let rows: Vec<Value> = records
        .iter()
        .enumerate()
        .skip(first)
        .take(args.count)
        .map(|(index, record)| record_row(index + 1, record, jury))
        .collect();
    emit_json(json!({ "results": rows }))
}

fn run_poster(args: &PosterArgs, store_path: &Path) -> Result<()> {
    let live = load_live(store_path)?;
    let opts = args.criteria.to_options();
    let criteria = build_criteria(POSTER_CRITERIA, &opts);
    let mut records = filter_records(&criteria, live.records_of(&args.channel));
    if records.is_empty() {
        return emit_json(json!({
            "results": [],
            "message": "no stored records meet the constraints",
        }));
    }
    let jury = args.criteria.jury.as_deref();
    let rows: Vec<Value> = match args.method {
        PosterMethod::BestPost | PosterMethod::WorstPost => {
            sort_records(&criteria, &mut records);
            if args.method == PosterMethod::BestPost {
                records.reverse();
            }
            dedup_by_author(&mut records);
            records
                .iter()
                .take(args.count)
                .enumerate()
                .map(|(index, record)| record_row(index + 1, record, jury))
                .collect()
        }
        PosterMethod::BestTotal | PosterMethod::WorstTotal => {
            let mut totals = author_totals(&records, jury);
            if args.method == PosterMethod::BestTotal {
                totals.reverse();
            }
            totals
                .iter()
                .take(args.count)
                .enumerate()
                .map(|(index, total)| {
                    json!({
                        "position": index + 1,
                        "author": total.author.tag,
                        "average": total.average,
                        "average_text": render::show_score(total.average),
                        "posts": total.post_count,
                    })
                })
                .collect()
        }
    };
    emit_json(json!({ "results": rows }))
}

fn run_graph(args: &GraphArgs, store_path: &Path) -> Result<()> {
    let live = load_live(store_path)?;
    let opts = args.criteria.to_options();
    let criteria = build_criteria(GRAPH_CRITERIA, &opts);
    let records = filter_records(&criteria, live.records_of(&args.channel));
    if records.is_empty() {
        return emit_json(json!({
            "lines": [],
            "message": "no stored records meet the constraints",
        }));
    }
    let period = time_period(&records);
    let anchor = args
        .criteria
        .date0
        .or(period.map(|(from, _)| from))
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);
    let unit = args.time_unit;
    let jury = args.criteria.jury.as_deref();
    let buckets = split_into_buckets(records, unit, anchor);
    let series = match args.param {
        GraphParam::AverageRating => average_score_series(&buckets, unit, jury),
        GraphParam::Count => count_series(&buckets, unit),
    };
    let label = match args.param {
        GraphParam::AverageRating => "average rating",
        GraphParam::Count => "record count",
    };
    let title = render::append_period(
        format!("{label} per {}", unit.as_str()),
        args.criteria.date0.or(period.map(|(from, _)| from)),
        args.criteria.date1.or(period.map(|(_, to)| to)),
    );
    let lines = render::chart_lines(&series, args.barwidth.clamp(MIN_BAR_WIDTH, MAX_BAR_WIDTH));
    emit_json(json!({
        "title": title,
        "unit": unit.as_str(),
        "axis_max": series.axis_max,
        "lines": lines,
    }))
}

fn run_status(store_path: &Path) -> Result<()> {
    let live = load_live(store_path)?;
    if live.is_empty() {
        return emit_json(json!({ "channels": [], "message": "nothing is loaded" }));
    }
    let channels: Vec<Value> = live
        .channels
        .iter()
        .map(|(channel_id, bucket)| {
            let period = time_period(&bucket.records);
            json!({
                "channel_id": channel_id,
                "name": bucket.name,
                "records": bucket.records.len(),
                "from": period.map(|(from, _)| render::show_date(from)),
                "to": period.map(|(_, to)| render::show_date(to)),
            })
        })
        .collect();
    emit_json(json!({ "channels": channels, "total": live.record_count() }))
}

fn run_clear(store_path: &Path) -> Result<()> {
    let mut live = load_live(store_path)?;
    let dropped = live.record_count();
    live.clear();
    save_live(store_path, &live)?;
    emit_json(json!({ "cleared": dropped }))
}

fn run_snapshot(command: SnapshotCommand, store_path: &Path, config: &Config) -> Result<()> {
    let data_dir = config.data_dir();
    let mut snapshots = SnapshotStore::open(&data_dir)
        .with_context(|| format!("opening snapshot directory {}", data_dir.display()))?;
    match command {
        SnapshotCommand::List => {
            let entries: Vec<Value> = snapshots
                .list()
                .iter()
                .map(|entry| {
                    json!({
                        "name": entry.name,
                        "modified_at": entry.modified_at.format(&Rfc3339).ok(),
                    })
                })
                .collect();
            emit_json(json!({ "entries": entries, "limit": ratings_snapshot::MAX_ENTRIES }))
        }
        SnapshotCommand::Read(args) => {
            let loaded = snapshots.read(&args.name)?;
            let policy = if args.overwrite {
                ConflictPolicy::TakeNew
            } else {
                ConflictPolicy::LatestCaptured
            };
            let mut live = load_live(store_path)?;
            let counts = live.insert_all(loaded, policy);
            save_live(store_path, &live)?;
            emit_json(json!({
                "read": args.name,
                "channels": counts,
                "total": live.record_count(),
            }))
        }
        SnapshotCommand::Write(args) => {
            let live = load_live(store_path)?;
            let filter = WriteFilter {
                date0: args.date0,
                date1: args.date1,
                channel: args.channel.clone(),
            };
            snapshots.write(&args.name, args.method, &live, &filter)?;
            emit_json(json!({ "written": args.name, "method": args.method.as_str() }))
        }
        SnapshotCommand::Remove(args) => {
            snapshots.remove(&args.name)?;
            emit_json(json!({ "removed": args.name }))
        }
    }
}
