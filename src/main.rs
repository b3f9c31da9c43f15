use std::path::PathBuf;
use std::process;

use clap::{ArgGroup, Parser, Subcommand};

use commands::{
    add_medication, advise, list_medications, miss_dose, remove_medication, run_daemon,
    show_schedule, take_dose, AddArgs,
};
use config::Config;
use database::Store;
use error::Result;
use schedule::MissedAction;

pub mod commands;
pub mod config;
pub mod daemon;
pub mod database;
pub mod error;
pub mod plan;
pub mod reminder;
pub mod schedule;
pub mod time;

#[derive(Parser)]
#[command(name = "medibuddy")]
#[command(
    about = "Medication dose scheduling and reminders",
    long_about = "Plan medication doses over a course of days, track which doses were taken or missed, and get desktop reminders before each dose. Everything is saved as JSON."
)]
#[command(version)]
struct Cli {
    /// Path to the data file (overrides config and MEDIBUDDY_DATA)
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a medication and schedule all of its doses
    #[command(visible_alias = "a")]
    #[command(group(ArgGroup::new("timing").required(true).args(["every", "slots"])))]
    Add {
        /// Name of the medication
        name: String,
        /// Quantity per dose (e.g. 2)
        #[arg(short, long)]
        dose: u32,
        /// Unit of the dose (e.g. "tablets", "ml")
        #[arg(short, long, default_value = "tablet")]
        unit: String,
        /// Doses per day
        #[arg(long)]
        times: u32,
        /// Number of dosing days
        #[arg(long)]
        days: u32,
        /// "daily" or "every other day"
        #[arg(short, long, default_value = "daily")]
        freq: String,
        /// First dosing day, YYYY-MM-DD (default: today)
        #[arg(long)]
        start: Option<String>,
        /// Hours between doses, starting at --at
        #[arg(long, requires = "at")]
        every: Option<u32>,
        /// Time of the first dose (e.g. "8:00", "8:00 AM", "morning")
        #[arg(long)]
        at: Option<String>,
        /// Explicit comma separated dose times (e.g. "8:00 AM, 8:00 PM")
        #[arg(long)]
        slots: Option<String>,
        /// Reminder options: any of 10m, 5m, exact (default: exact)
        #[arg(short, long)]
        remind: Option<String>,
        /// Quantity on hand (default: what the plan needs)
        #[arg(long)]
        initial_qty: Option<u32>,
        /// What the medication is for
        #[arg(long)]
        description: Option<String>,
        /// Optional notes
        #[arg(short, long)]
        notes: Option<String>,
    },
    /// Remove a medication and all of its scheduled doses
    #[command(visible_alias = "r")]
    Remove { name: String },
    /// List medications
    #[command(visible_aliases = ["l", "ls"])]
    List,
    /// Show the doses for a day with their status
    #[command(visible_aliases = ["s", "today"])]
    Schedule {
        /// Day to show, YYYY-MM-DD (default: today)
        #[arg(long)]
        day: Option<String>,
        /// Only show this medication
        #[arg(long)]
        med: Option<String>,
    },
    /// Mark a dose as taken
    #[command(visible_alias = "t")]
    Take {
        name: String,
        /// Day of the dose (default: today)
        #[arg(long)]
        day: Option<String>,
        /// Scheduled time of the dose (default: the nearest open dose)
        #[arg(long)]
        at: Option<String>,
        /// Quantity actually taken
        #[arg(short, long)]
        qty: Option<String>,
    },
    /// Record what happened to a missed dose
    #[command(visible_alias = "m")]
    #[command(group(ArgGroup::new("action").required(true).args(["skip", "take_late"])))]
    Miss {
        name: String,
        /// Skip the dose
        #[arg(long)]
        skip: bool,
        /// Take the dose now, later than scheduled
        #[arg(long)]
        take_late: bool,
        #[arg(long)]
        day: Option<String>,
        #[arg(long)]
        at: Option<String>,
        /// Quantity taken (with --take-late)
        #[arg(short, long)]
        qty: Option<String>,
    },
    /// Should a missed dose still be taken?
    Advise {
        name: String,
        #[arg(long)]
        day: Option<String>,
        #[arg(long)]
        at: Option<String>,
    },
    /// Start the reminder daemon
    #[command(visible_alias = "d")]
    Daemon,
}

fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(data) = cli.data {
        config.data_file = data;
    }
    let store = Store::new(&config.data_file);

    match cli.command {
        Commands::Add {
            name,
            dose,
            unit,
            times,
            days,
            freq,
            start,
            every,
            at,
            slots,
            remind,
            initial_qty,
            description,
            notes,
        } => add_medication(
            &store,
            AddArgs {
                name,
                description,
                dose,
                unit,
                times,
                days,
                freq,
                start,
                every,
                at,
                slots,
                remind,
                initial_qty,
                notes,
            },
        ),
        Commands::Remove { name } => remove_medication(&store, &name),
        Commands::List => list_medications(&store),
        Commands::Schedule { day, med } => show_schedule(&store, day.as_deref(), med.as_deref()),
        Commands::Take { name, day, at, qty } => {
            take_dose(&store, &name, day.as_deref(), at.as_deref(), qty)
        }
        Commands::Miss {
            name,
            skip,
            take_late: _,
            day,
            at,
            qty,
        } => {
            let action = if skip {
                MissedAction::Skip
            } else {
                MissedAction::TakeLate
            };
            miss_dose(&store, &name, action, day.as_deref(), at.as_deref(), qty)
        }
        Commands::Advise { name, day, at } => {
            advise(&store, &config, &name, day.as_deref(), at.as_deref())
        }
        Commands::Daemon => {
            run_daemon(store, &config);
            Ok(())
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let default_level = match cli.command {
        Commands::Daemon => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
