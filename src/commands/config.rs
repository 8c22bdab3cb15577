// Copyright (c) 2025 Soumyadip Sarkar.
// All rights reserved.
//
// This source code is licensed under the license found in the
// LICENSE file in the root directory of this source tree.

use anyhow::{Result, anyhow};
use rusqlite::Connection;

use crate::settings::{all_settings, get_setting, is_known_key, set_setting};
use crate::utils::{arg, pretty_table};

fn display_value(key: &str, value: &str) -> String {
    if key == "wu_api_key" && !value.is_empty() {
        let tail: String = value.chars().rev().take(4).collect::<Vec<_>>().into_iter().rev().collect();
        format!("****{}", tail)
    } else {
        value.to_string()
    }
}

pub fn handle(conn: &Connection, m: &clap::ArgMatches) -> Result<()> {
    match m.subcommand() {
        Some(("get", sub)) => {
            let key = arg(sub, "key")?;
            if !is_known_key(key) {
                return Err(anyhow!("Unknown setting '{}'", key));
            }
            let value = get_setting(conn, key)?.unwrap_or_default();
            println!("{}", display_value(key, &value));
        }
        Some(("set", sub)) => {
            let key = arg(sub, "key")?;
            let value = arg(sub, "value")?;
            set_setting(conn, key, value)?;
            println!("Set {} = {}", key, display_value(key, value));
        }
        Some(("list", _)) => {
            let data = all_settings(conn)?
                .into_iter()
                .map(|(k, v, d)| {
                    let shown = display_value(&k, &v);
                    vec![k, shown, d]
                })
                .collect();
            println!("{}", pretty_table(&["Key", "Value", "Description"], data));
        }
        _ => {}
    }
    Ok(())
}
