//! Line-based admin console for `serve`: edits the record store, which in
//! turn notifies the running server.

use std::str::FromStr;

use anyhow::{Context, anyhow, bail};
use arena_common::WorldSize;
use arena_persist::{PuckRecord, RecordStore, SettingKey};
use arena_server::ArenaServer;

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Add { label: Option<String> },
    Remove(String),
    Show(String),
    Hide(String),
    Set { key: SettingKey, value: String },
    Resize(WorldSize),
    List,
    Stats,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  add [label]          add an active puck
  remove <id>          delete a puck
  show <id> | hide <id>  toggle whether a puck is simulated
  set <key> <value>    change a setting (gravity_x, gravity_y, friction,
                       restitution, air_friction, max_pucks, arch_gravity)
  resize <w> <h>       move the walls
  list | stats | help | quit";

impl FromStr for AdminCommand {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            bail!("empty command");
        };
        let mut arg = |what: &str| {
            words
                .next()
                .map(str::to_owned)
                .ok_or_else(|| anyhow!("{verb}: missing {what}"))
        };
        let cmd = match verb {
            "add" => {
                let rest: Vec<&str> = line.split_whitespace().skip(1).collect();
                Self::Add {
                    label: (!rest.is_empty()).then(|| rest.join(" ")),
                }
            }
            "remove" | "rm" => Self::Remove(arg("id")?),
            "show" => Self::Show(arg("id")?),
            "hide" => Self::Hide(arg("id")?),
            "set" => {
                let key = arg("key")?.parse::<SettingKey>()?;
                Self::Set {
                    key,
                    value: arg("value")?,
                }
            }
            "resize" => {
                let width = arg("width")?.parse().context("resize: width")?;
                let height = arg("height")?.parse().context("resize: height")?;
                Self::Resize(WorldSize::new(width, height))
            }
            "list" | "ls" => Self::List,
            "stats" => Self::Stats,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => bail!("unknown command {other:?}, try `help`"),
        };
        Ok(cmd)
    }
}

/// What the console loop should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Run one command. Output goes to stdout.
pub fn execute(cmd: AdminCommand, store: &RecordStore, server: &ArenaServer) -> anyhow::Result<Flow> {
    match cmd {
        AdminCommand::Add { label } => {
            let record = store.add_puck(PuckRecord {
                label,
                ..PuckRecord::new()
            })?;
            println!("added {}", record.id);
        }
        AdminCommand::Remove(id) => report(&id, store.remove_puck(&id)?),
        AdminCommand::Show(id) => report(&id, store.set_active(&id, true)?),
        AdminCommand::Hide(id) => report(&id, store.set_active(&id, false)?),
        AdminCommand::Set { key, value } => {
            store.set_setting(key, &value)?;
            println!("{key} = {value}");
        }
        AdminCommand::Resize(size) => {
            server.resize(size)?;
            println!("world is now {}x{}", size.width, size.height);
        }
        AdminCommand::List => {
            for puck in store.pucks() {
                println!(
                    "{} {} size={} mass={} {}",
                    puck.id,
                    if puck.active { "active" } else { "hidden" },
                    puck.size,
                    puck.mass,
                    puck.label.as_deref().unwrap_or("")
                );
            }
        }
        AdminCommand::Stats => {
            let s = server.stats();
            println!(
                "viewers={} peak={} taps={} dropped_taps={} ticks={} steps={} bodies={} full_syncs={} deltas={}",
                s.viewers,
                s.peak_viewers,
                s.total_taps,
                s.dropped_taps,
                s.ticks,
                s.steps,
                s.bodies,
                s.broadcasts.full_syncs,
                s.broadcasts.deltas
            );
        }
        AdminCommand::Help => println!("{HELP}"),
        AdminCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn report(id: &str, found: bool) {
    if found {
        println!("ok");
    } else {
        println!("no puck {id}");
    }
}
