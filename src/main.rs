mod commands;
mod context;
mod dates;
mod render;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use famsync_core::config::Settings;
use famsync_core::sync::{DeleteScope, DeleteSpan};
use tracing_subscriber::EnvFilter;

use context::Context;

#[derive(Parser)]
#[command(name = "famsync")]
#[command(about = "Keep one family event linked across everyone's calendars")]
struct Cli {
    /// Log engine activity to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List calendars, or add one
    Calendars {
        #[command(subcommand)]
        action: Option<CalendarAction>,
    },
    /// Manage the people events are shown for
    People {
        #[command(subcommand)]
        action: PeopleAction,
    },
    /// Manage drivers who are not family members
    Drivers {
        #[command(subcommand)]
        action: DriverAction,
    },
    /// Show the merged agenda across calendars
    Events {
        /// Only read these calendars (by id or name)
        #[arg(short, long)]
        calendar: Vec<String>,

        /// Show events from this date (defaults to today)
        #[arg(long)]
        from: Option<String>,

        /// Show events until this date (defaults to a week after --from)
        #[arg(long)]
        to: Option<String>,
    },
    /// Create an event in one or more calendars, linked together
    New {
        title: Option<String>,

        /// Start date/time (e.g. "2025-03-20 15:00" or "next friday at 5pm")
        #[arg(short, long)]
        start: Option<String>,

        /// End date/time
        #[arg(short, long, conflicts_with = "duration")]
        end: Option<String>,

        /// Duration (e.g. "30m", "1h", "2h30m")
        #[arg(short, long, conflicts_with = "end")]
        duration: Option<String>,

        #[arg(short, long)]
        location: Option<String>,

        /// Calendars to create a copy in (repeatable)
        #[arg(short, long)]
        calendar: Vec<String>,

        #[arg(long, value_enum)]
        repeat: Option<Repeat>,

        /// Repeat every N days/weeks/months/years
        #[arg(long, default_value_t = 1, requires = "repeat")]
        interval: u32,

        /// Stop after N occurrences, the first included
        #[arg(long, requires = "repeat", conflicts_with = "until")]
        count: Option<u32>,

        /// Last day of the series
        #[arg(long, requires = "repeat")]
        until: Option<String>,

        /// Family member driving (name or id); adds a travel event to their calendar
        #[arg(long, conflicts_with = "driver", requires = "travel")]
        driver_person: Option<String>,

        /// Travel time in minutes for --driver-person
        #[arg(long)]
        travel: Option<u32>,

        /// Standalone driver (name or id)
        #[arg(long)]
        driver: Option<String>,

        /// Reminder, in minutes before the start
        #[arg(long)]
        alarm: Option<i64>,
    },
    /// Edit one calendar copy and propagate it to the linked copies
    Edit {
        calendar: String,
        id: String,

        /// Start of the occurrence to edit, for recurring events
        #[arg(long)]
        occurrence: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(short, long)]
        start: Option<String>,

        #[arg(short, long, conflicts_with = "duration")]
        end: Option<String>,

        #[arg(short, long, conflicts_with = "end")]
        duration: Option<String>,

        /// New location; pass "" to clear it
        #[arg(short, long)]
        location: Option<String>,

        /// Leave the linked copies as they are
        #[arg(long)]
        this_calendar: bool,
    },
    /// Delete an event from one calendar or from every linked calendar
    Delete {
        calendar: String,
        id: String,

        /// Start of the occurrence to delete, for recurring events
        #[arg(long)]
        occurrence: Option<String>,

        #[arg(long, value_enum)]
        span: Option<SpanArg>,

        #[arg(long, value_enum)]
        scope: Option<ScopeArg>,
    },
    /// Show whether an event's linked copies are still in step, or list
    /// every group that needs attention
    Status {
        #[arg(requires = "id")]
        calendar: Option<String>,
        id: Option<String>,
    },
    /// Keep the agenda on screen, refreshing whenever the calendars change
    Watch {
        #[arg(short, long)]
        calendar: Vec<String>,

        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        to: Option<String>,
    },
}

#[derive(Subcommand)]
enum CalendarAction {
    Add {
        name: String,

        /// Hex color, e.g. "#3366ff"
        #[arg(long)]
        color: Option<String>,

        /// Person the calendar belongs to (name or id)
        #[arg(long)]
        owner: Option<String>,

        /// Use this calendar as the owner's home calendar for travel events
        #[arg(long, requires = "owner")]
        auto_link: bool,

        /// Calendar shared by the whole family
        #[arg(long)]
        shared: bool,
    },
}

#[derive(Subcommand)]
enum PeopleAction {
    Add {
        name: String,
        #[arg(long)]
        color: String,
    },
    List,
    /// Remove a person (name or id)
    Remove { name: String },
}

#[derive(Subcommand)]
enum DriverAction {
    Add { name: String },
    List,
    /// Remove a driver (name or id)
    Remove { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum Repeat {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

#[derive(Clone, Copy, ValueEnum)]
enum SpanArg {
    This,
    Future,
}

impl From<SpanArg> for DeleteSpan {
    fn from(span: SpanArg) -> Self {
        match span {
            SpanArg::This => DeleteSpan::ThisOccurrence,
            SpanArg::Future => DeleteSpan::ThisAndFuture,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum ScopeArg {
    Single,
    All,
}

impl From<ScopeArg> for DeleteScope {
    fn from(scope: ScopeArg) -> Self {
        match scope {
            ScopeArg::Single => DeleteScope::SingleCalendar,
            ScopeArg::All => DeleteScope::AllLinked,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::load()?;
    let mut ctx = Context::open(settings)?;

    match cli.command {
        Commands::Calendars { action: None } => commands::calendars::list(&ctx).await,
        Commands::Calendars {
            action:
                Some(CalendarAction::Add {
                    name,
                    color,
                    owner,
                    auto_link,
                    shared,
                }),
        } => commands::calendars::add(&ctx, name, color, owner, auto_link, shared).await,
        Commands::People {
            action: PeopleAction::Add { name, color },
        } => commands::people::add(&ctx, name, color).await,
        Commands::People {
            action: PeopleAction::List,
        } => commands::people::list(&ctx).await,
        Commands::People {
            action: PeopleAction::Remove { name },
        } => commands::people::remove(&ctx, name).await,
        Commands::Drivers {
            action: DriverAction::Add { name },
        } => commands::drivers::add(&ctx, name).await,
        Commands::Drivers {
            action: DriverAction::List,
        } => commands::drivers::list(&ctx).await,
        Commands::Drivers {
            action: DriverAction::Remove { name },
        } => commands::drivers::remove(&ctx, name).await,
        Commands::Events { calendar, from, to } => {
            let calendars = ctx.require_calendars(&calendar).await?;
            let range = dates::date_range(from.as_deref(), to.as_deref())?;
            commands::events::run(&ctx, calendars, range).await
        }
        Commands::New {
            title,
            start,
            end,
            duration,
            location,
            calendar,
            repeat,
            interval,
            count,
            until,
            driver_person,
            travel,
            driver,
            alarm,
        } => {
            let args = commands::new::NewArgs {
                title,
                start,
                end,
                duration,
                location,
                calendars: calendar,
                repeat: repeat.map(Repeat::frequency),
                interval,
                count,
                until,
                driver_person,
                travel,
                driver,
                alarm,
            };
            commands::new::run(&mut ctx, args).await
        }
        Commands::Edit {
            calendar,
            id,
            occurrence,
            title,
            start,
            end,
            duration,
            location,
            this_calendar,
        } => {
            let args = commands::edit::EditArgs {
                occurrence,
                title,
                start,
                end,
                duration,
                location,
                this_calendar,
            };
            commands::edit::run(&mut ctx, &calendar, &id, args).await
        }
        Commands::Delete {
            calendar,
            id,
            occurrence,
            span,
            scope,
        } => {
            commands::delete::run(
                &mut ctx,
                &calendar,
                &id,
                occurrence,
                span.map(Into::into),
                scope.map(Into::into),
            )
            .await
        }
        Commands::Status {
            calendar: Some(calendar),
            id: Some(id),
        } => commands::status::run(&ctx, &calendar, &id).await,
        Commands::Status { .. } => commands::status::all(&ctx).await,
        Commands::Watch { calendar, from, to } => {
            let calendars = ctx.require_calendars(&calendar).await?;
            let range = dates::date_range(from.as_deref(), to.as_deref())?;
            commands::watch::run(&ctx, calendars, range).await
        }
    }
}

impl Repeat {
    fn frequency(self) -> famsync_core::Frequency {
        match self {
            Repeat::Daily => famsync_core::Frequency::Daily,
            Repeat::Weekly => famsync_core::Frequency::Weekly,
            Repeat::Monthly => famsync_core::Frequency::Monthly,
            Repeat::Yearly => famsync_core::Frequency::Yearly,
        }
    }
}

/// RUST_LOG wins; otherwise famsync's own info, or debug with --verbose.
/// The "famsync" target prefix also covers famsync_core.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "famsync=debug" } else { "famsync=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
