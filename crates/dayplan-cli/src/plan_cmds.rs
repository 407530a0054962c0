//! Handlers for `dayplan plan` subcommands.
//!
//! Implements:
//! - `dayplan plan generate --user U --wake HH:MM --sleep HH:MM --energy E`
//! - `dayplan plan show --user U [--date D]`
//! - `dayplan plan reorder --user U --date D <source> <target>`

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};

use dayplan_core::collab::{AnchorProvider, StaticAnchorProvider};
use dayplan_core::domain::{Anchor, PlanInput};
use dayplan_core::schedule::builder::parse_energy_state;
use dayplan_core::store::PlanStore;
use dayplan_core::{DailyPlan, PlanService};
use dayplan_db::models::AnchorType;

use crate::PlanCommands;
use crate::config::DayplanConfig;

#[derive(Debug, clap::Args)]
pub struct GenerateArgs {
    /// User the plan belongs to
    #[arg(long)]
    pub user: String,
    /// Plan date, YYYY-MM-DD (defaults to today)
    #[arg(long)]
    pub date: Option<NaiveDate>,
    /// Target wake time, HH:MM
    #[arg(long)]
    pub wake: String,
    /// Target sleep time, HH:MM (earlier than wake means after midnight)
    #[arg(long)]
    pub sleep: String,
    /// Energy state: low, medium, or high
    #[arg(long)]
    pub energy: String,
    /// TOML file of calendar anchors (overrides the config file)
    #[arg(long)]
    pub anchors: Option<PathBuf>,
    /// Where the user is now (defaults to home)
    #[arg(long)]
    pub location: Option<String>,
    /// Title of a manual anchor, used when the calendar has nothing that day
    #[arg(long, requires_all = ["manual_start", "manual_end"])]
    pub manual_title: Option<String>,
    /// Manual anchor start, HH:MM
    #[arg(long, requires = "manual_title")]
    pub manual_start: Option<String>,
    /// Manual anchor end, HH:MM
    #[arg(long, requires = "manual_title")]
    pub manual_end: Option<String>,
    /// Manual anchor location
    #[arg(long, requires = "manual_title")]
    pub manual_location: Option<String>,
    /// Generate against an in-process store and print the result
    #[arg(long)]
    pub in_memory: bool,
}

// -----------------------------------------------------------------------
// Public entry point
// -----------------------------------------------------------------------

/// Dispatch a `PlanCommands` variant to the appropriate handler.
pub async fn run_plan_command(
    command: PlanCommands,
    config: &DayplanConfig,
    store: Arc<dyn PlanStore>,
) -> Result<()> {
    match command {
        PlanCommands::Generate(args) => {
            let anchors = anchor_provider(args.anchors.as_deref(), config)?;
            let service = PlanService::with_default_estimators(anchors, store, &config.scheduler);
            cmd_generate(&service, &args, Local::now().naive_local()).await
        }
        PlanCommands::Show { user, date, json } => {
            let service = offline_service(store, config);
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            cmd_show(&service, &user, date, json).await
        }
        PlanCommands::Reorder {
            user,
            date,
            source,
            target,
        } => {
            let service = offline_service(store, config);
            cmd_reorder(&service, &user, date, &source, &target).await
        }
    }
}

/// The anchor provider for a command: the `--anchors` flag, else the
/// configured file, else no anchors at all.
pub fn anchor_provider(
    flag: Option<&Path>,
    config: &DayplanConfig,
) -> Result<Arc<dyn AnchorProvider>> {
    match flag.or(config.anchors_file.as_deref()) {
        Some(path) => Ok(Arc::new(StaticAnchorProvider::from_file(path)?)),
        None => Ok(Arc::new(StaticAnchorProvider::default())),
    }
}

/// Reads and reorders never consult the calendar.
fn offline_service(store: Arc<dyn PlanStore>, config: &DayplanConfig) -> PlanService {
    PlanService::with_default_estimators(
        Arc::new(StaticAnchorProvider::default()),
        store,
        &config.scheduler,
    )
}

// -----------------------------------------------------------------------
// dayplan plan generate
// -----------------------------------------------------------------------

async fn cmd_generate(service: &PlanService, args: &GenerateArgs, now: NaiveDateTime) -> Result<()> {
    let input = build_input(args, now)?;
    let plan = service
        .generate(&input, args.location.as_deref())
        .await
        .with_context(|| format!("failed to generate plan for {} on {}", input.user_id, input.date))?;

    println!("Plan generated.");
    println!();
    print!("{}", PlanView(&plan));
    Ok(())
}

/// Turn command-line arguments into a generation request.
pub fn build_input(args: &GenerateArgs, now: NaiveDateTime) -> Result<PlanInput> {
    let date = args.date.unwrap_or(now.date());
    let wake_time = parse_clock(&args.wake).context("invalid --wake")?;
    let sleep_time = parse_clock(&args.sleep).context("invalid --sleep")?;
    let energy_state = parse_energy_state(&args.energy)?;

    let manual_anchor = match (&args.manual_title, &args.manual_start, &args.manual_end) {
        (Some(title), Some(start), Some(end)) => {
            let start = date.and_time(parse_clock(start).context("invalid --manual-start")?);
            let end = date.and_time(parse_clock(end).context("invalid --manual-end")?);
            if end <= start {
                bail!("manual anchor must end after it starts");
            }
            Some(Anchor {
                id: "manual".to_owned(),
                title: title.clone(),
                start,
                end,
                location: args.manual_location.clone(),
                anchor_type: AnchorType::Other,
                must_attend: true,
                calendar_event_id: None,
            })
        }
        _ => None,
    };

    Ok(PlanInput {
        user_id: args.user.clone(),
        date,
        wake_time,
        sleep_time,
        energy_state,
        manual_anchor,
        now,
    })
}

/// Parse `HH:MM` or `HH:MM:SS`.
pub fn parse_clock(value: &str) -> Result<NaiveTime> {
    let value = value.trim();
    NaiveTime::parse_from_str(value, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(value, "%H:%M:%S"))
        .with_context(|| format!("{value:?} is not a time of day (expected HH:MM)"))
}

// -----------------------------------------------------------------------
// dayplan plan show
// -----------------------------------------------------------------------

async fn cmd_show(service: &PlanService, user_id: &str, date: NaiveDate, json: bool) -> Result<()> {
    let Some(plan) = service.get_plan(user_id, date).await? else {
        println!("No plan for {user_id} on {date}. Use `dayplan plan generate` to create one.");
        return Ok(());
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&plan).context("failed to serialize plan")?
        );
    } else {
        print!("{}", PlanView(&plan));
    }
    Ok(())
}

// -----------------------------------------------------------------------
// dayplan plan reorder
// -----------------------------------------------------------------------

async fn cmd_reorder(
    service: &PlanService,
    user_id: &str,
    date: NaiveDate,
    source: &str,
    target: &str,
) -> Result<()> {
    let plan = service.reorder_step(user_id, date, source, target).await?;
    println!("Moved {source} to the position of {target}.");
    println!();
    print!("{}", PlanView(&plan));
    Ok(())
}

// -----------------------------------------------------------------------
// Rendering
// -----------------------------------------------------------------------

/// Human-readable plan summary: header, blocks, chains, home intervals.
pub struct PlanView<'a>(pub &'a DailyPlan);

impl fmt::Display for PlanView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.0;
        let hm = |t: NaiveDateTime| t.format("%H:%M");

        writeln!(f, "Plan for {} on {}", plan.user_id, plan.date)?;
        writeln!(f, "  ID:         {}", plan.id)?;
        writeln!(f, "  Energy:     {}", plan.energy_state)?;
        writeln!(
            f,
            "  Day:        {} (start) / {} (wake) / {} (sleep)",
            hm(plan.plan_start),
            hm(plan.wake_time),
            hm(plan.sleep_time),
        )?;
        if plan.wake_ramp.skipped {
            writeln!(f, "  Wake ramp:  skipped")?;
        }

        writeln!(f)?;
        writeln!(f, "Blocks:")?;
        let name_w = plan
            .time_blocks
            .iter()
            .map(|b| b.activity_name.len())
            .max()
            .unwrap_or(4)
            .max(4);
        for block in &plan.time_blocks {
            writeln!(
                f,
                "  {}-{}  {:<name_w$}  {:<10}  {}",
                hm(block.start_time),
                hm(block.end_time),
                block.activity_name,
                block.activity_type.to_string(),
                block.id,
            )?;
        }

        for chain in &plan.chains {
            writeln!(f)?;
            writeln!(
                f,
                "Chain {} (deadline {}):",
                chain.chain_id,
                hm(chain.chain_completion_deadline)
            )?;
            for step in &chain.steps {
                writeln!(
                    f,
                    "  {}-{}  {}  [{}]",
                    hm(step.start_time),
                    hm(step.end_time),
                    step.step_id,
                    step.name,
                )?;
            }
        }

        if !plan.exit_times.is_empty() {
            writeln!(f)?;
            writeln!(f, "Leave home:")?;
            for exit in &plan.exit_times {
                writeln!(f, "  {}  for {}", hm(exit.exit_at), exit.anchor_id)?;
            }
        }

        if !plan.home_intervals.is_empty() {
            writeln!(f)?;
            writeln!(f, "At home:")?;
            for interval in &plan.home_intervals {
                writeln!(f, "  {}-{}", hm(interval.start), hm(interval.end))?;
            }
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
