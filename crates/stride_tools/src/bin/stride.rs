#![forbid(unsafe_code)]

use std::env;

use stride_kernel_contracts::ledger::CalendarDate;
use stride_tools::replay::{render_replay, run_replay, ReplayScenario, ReplaySourceKind};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

const USAGE: &str = "usage: stride replay [--user <id>] [--source absolute|incremental] \
[--script n,n,...] [--today YYYY-MM-DD] [--seed YYYY-MM-DD=count ...]";

fn run() -> Result<(), String> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.is_empty() || args[0] != "replay" {
        return Err(USAGE.to_string());
    }

    let mut user_id = "user_local".to_string();
    let mut source = ReplaySourceKind::Incremental;
    let mut script: Vec<u64> = vec![50, 70, 0, 120];
    let mut today: Option<CalendarDate> = None;
    let mut seeded_rows: Vec<(CalendarDate, u64)> = Vec::new();

    let mut iter = args[1..].iter();
    while let Some(flag) = iter.next() {
        match flag.as_str() {
            "--user" => {
                user_id = iter
                    .next()
                    .ok_or_else(|| USAGE.to_string())?
                    .to_string();
            }
            "--source" => {
                source = ReplaySourceKind::parse(iter.next().ok_or_else(|| USAGE.to_string())?)?;
            }
            "--script" => {
                script = parse_script(iter.next().ok_or_else(|| USAGE.to_string())?)?;
            }
            "--today" => {
                let raw = iter.next().ok_or_else(|| USAGE.to_string())?;
                today = Some(
                    CalendarDate::parse_iso(raw)
                        .map_err(|v| format!("invalid --today value: {v:?}"))?,
                );
            }
            "--seed" => {
                seeded_rows.push(parse_seed(iter.next().ok_or_else(|| USAGE.to_string())?)?);
            }
            other => return Err(format!("unknown flag {other:?}\n{USAGE}")),
        }
    }

    let today = match today {
        Some(date) => date,
        None => CalendarDate::from_naive(chrono::Local::now().date_naive())
            .map_err(|v| format!("local date outside supported range: {v:?}"))?,
    };

    let scenario = ReplayScenario {
        user_id,
        today,
        source,
        script,
        seeded_rows,
    };
    let outcome = run_replay(&scenario)?;
    print!("{}", render_replay(&outcome));
    Ok(())
}

fn parse_script(raw: &str) -> Result<Vec<u64>, String> {
    let script: Vec<u64> = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u64>()
                .map_err(|_| format!("invalid script entry {part:?}"))
        })
        .collect::<Result<_, _>>()?;
    if script.is_empty() {
        return Err("script must contain at least one reading".to_string());
    }
    Ok(script)
}

fn parse_seed(raw: &str) -> Result<(CalendarDate, u64), String> {
    let (date_part, count_part) = raw
        .split_once('=')
        .ok_or_else(|| format!("invalid seed {raw:?}, expected YYYY-MM-DD=count"))?;
    let date = CalendarDate::parse_iso(date_part)
        .map_err(|v| format!("invalid seed date: {v:?}"))?;
    let count = count_part
        .trim()
        .parse::<u64>()
        .map_err(|_| format!("invalid seed count {count_part:?}"))?;
    Ok((date, count))
}
