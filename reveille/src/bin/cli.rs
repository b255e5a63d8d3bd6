//! Command-line interface for reveille.
//!
//! This binary provides a CLI for controlling and monitoring the alarm
//! daemon via the HTTP API.

use std::env;

use anyhow::{Context, Result};

use reveille::alarm::AlarmId;
use reveille::api_client::{
    self,
    types::{ScheduledFire, SequenceStatus},
};

fn usage() -> ! {
    eprintln!("Usage: reveille-cli <command>");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status             Show sequencer state and next alarms");
    eprintln!("  alarms             List alarms");
    eprintln!("  schedule           List every planned fire instant");
    eprintln!("  trigger <id>       Run an alarm's wake-up sequence now");
    eprintln!("  snooze [minutes]   Snooze the running alarm (default 5)");
    eprintln!("  dismiss            Dismiss the running or snoozed alarm");
    eprintln!("  rebuild            Re-plan alarms from the store");
    eprintln!();
    eprintln!("Environment:");
    eprintln!(
        "  REVEILLE_API_URL    API base URL (default: {})",
        api_client::DEFAULT_BASE_URL
    );
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        usage();
    }

    let command = &args[1];
    let arg = args.get(2).map(String::as_str);

    match command.as_str() {
        "status" => cmd_status().await?,
        "alarms" => cmd_alarms().await?,
        "schedule" => cmd_schedule().await?,
        "trigger" => {
            let id = arg
                .context("trigger needs an alarm id")?
                .parse()
                .context("alarm id must be a number")?;
            cmd_trigger(AlarmId(id)).await?
        }
        "snooze" => {
            let minutes = arg
                .map(str::parse)
                .transpose()
                .context("minutes must be a number")?;
            cmd_snooze(minutes).await?
        }
        "dismiss" => cmd_dismiss().await?,
        "rebuild" => cmd_rebuild().await?,
        _ => {
            eprintln!("Unknown command: {}", command);
            eprintln!("Run without arguments to see usage.");
            std::process::exit(1);
        }
    }

    Ok(())
}

/// Build an API client, honoring REVEILLE_API_URL if set.
fn make_client() -> api_client::Client {
    match env::var("REVEILLE_API_URL") {
        Ok(url) => api_client::Client::with_base_url(url),
        Err(_) => api_client::Client::new(),
    }
}

fn print_sequence(status: &SequenceStatus) {
    println!("Phase:   {}", status.phase);
    if let Some(id) = status.active_alarm_id {
        println!("Alarm:   {id}");
    }
    if let Some(step) = status.ramp_step {
        println!("Ramp:    step {step}");
    }
    if let (Some(id), Some(at)) = (status.snoozed_alarm_id, status.snooze_resume_at) {
        println!("Snoozed: alarm {id} until {}", at.format("%H:%M:%S"));
    }
    if let Some(outcome) = &status.last_outcome {
        println!(
            "Last:    alarm {} {} at {}",
            outcome.alarm_id,
            outcome.phase,
            outcome.at.format("%a %H:%M")
        );
    }
}

fn print_fires(fires: &[ScheduledFire]) {
    if fires.is_empty() {
        println!("  (none)");
    }
    for fire in fires {
        let origin = if fire.snooze { " (snooze)" } else { "" };
        println!(
            "  - {}  alarm {}{}",
            fire.at.format("%a %Y-%m-%d %H:%M"),
            fire.alarm_id,
            origin
        );
    }
}

async fn cmd_status() -> Result<()> {
    let client = make_client();
    let status = client.status().await?;

    print_sequence(&status.sequence);
    println!("Next alarms:");
    print_fires(&status.next_alarms);
    Ok(())
}

async fn cmd_alarms() -> Result<()> {
    let client = make_client();
    let alarms = client.alarms().await?;

    if alarms.is_empty() {
        println!("No alarms.");
    }
    for alarm in &alarms {
        println!(
            "{:>3}  {}  {:<12} {:<8} {}",
            alarm.id,
            alarm.time.format("%H:%M"),
            alarm.days.describe(),
            if alarm.enabled { "enabled" } else { "disabled" },
            alarm.name
        );
    }
    Ok(())
}

async fn cmd_schedule() -> Result<()> {
    let client = make_client();
    print_fires(&client.schedule().await?);
    Ok(())
}

async fn cmd_trigger(id: AlarmId) -> Result<()> {
    let client = make_client();
    let status = client.trigger(id).await?;
    println!("Alarm {id} triggered.");
    print_sequence(&status);
    Ok(())
}

async fn cmd_snooze(minutes: Option<u32>) -> Result<()> {
    let client = make_client();
    let status = client.snooze(minutes).await?;
    print_sequence(&status);
    Ok(())
}

async fn cmd_dismiss() -> Result<()> {
    let client = make_client();
    client.dismiss().await?;
    println!("Alarm dismissed.");
    Ok(())
}

async fn cmd_rebuild() -> Result<()> {
    let client = make_client();
    let result = client.rebuild().await?;
    println!("{} fire instants scheduled.", result.scheduled);
    Ok(())
}
