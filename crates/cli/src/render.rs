//! Terminal rendering: tables for listings, coloured lines for channel output.

use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use console::style;
use iapadmin_core::catalog::{CatalogEntry, OperationKind};
use iapadmin_core::Capabilities;
use iapadmin_protocol::{Instance, OutputMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Message,
    Stdout,
    Stderr,
    Error,
}

/// The non-empty parts of a frame, in display order
pub fn output_lines(message: &OutputMessage) -> Vec<(Stream, &str)> {
    [
        (Stream::Message, message.message.as_str()),
        (Stream::Stdout, message.stdout.as_str()),
        (Stream::Stderr, message.stderr.as_str()),
        (Stream::Error, message.error.as_str()),
    ]
    .into_iter()
    .filter(|(_, text)| !text.is_empty())
    .collect()
}

pub fn print_output(label: &str, message: &OutputMessage) {
    let prefix = style(format!("[{label}]")).dim();
    for (stream, text) in output_lines(message) {
        for line in text.lines() {
            match stream {
                Stream::Message => println!("{prefix} {}", style(line).cyan()),
                Stream::Stdout => println!("{prefix} {line}"),
                Stream::Stderr => eprintln!("{prefix} {}", style(line).yellow()),
                Stream::Error => eprintln!("{prefix} {}", style(line).red().bold()),
            }
        }
    }
}

pub fn notice(text: &str) {
    println!("{} {text}", style("•").green());
}

pub fn catalog_table(entries: &[CatalogEntry]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Kind", "Name", "Description"]);
    for entry in entries {
        let kind = match entry.kind {
            OperationKind::Single => "operation",
            OperationKind::Workflow => "workflow",
        };
        table.add_row(vec![kind, entry.name.as_str(), entry.description.as_str()]);
    }
    table
}

pub fn instance_table(instances: &[Instance]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["Name", "Zone", "Status", "Network", "IP", "RDP"]);
    for instance in instances {
        let network = instance
            .network_interfaces
            .first()
            .map(|nic| nic.network.as_str())
            .unwrap_or("");
        table.add_row(vec![
            instance.name.as_str(),
            instance.zone.as_str(),
            instance.status.as_str(),
            network,
            instance.network_ip().unwrap_or(""),
            rdp_column(instance),
        ]);
    }
    table
}

fn rdp_column(instance: &Instance) -> &'static str {
    match (instance.display_private_rdp_dom, instance.rdp_running) {
        (_, true) => "running",
        (true, false) => "available",
        (false, false) => "",
    }
}

/// Enabled features, comma separated
pub fn capability_summary(caps: &Capabilities) -> String {
    let flags = [
        (caps.rdp, "private RDP"),
        (caps.pre_rdp, "pre-RDP operations"),
        (caps.common_params, "common params"),
        (caps.project_operation, "project operation"),
        (caps.workflows, "workflows"),
        (caps.instance_operations, "instance operations"),
    ];
    let enabled: Vec<&str> = flags
        .iter()
        .filter(|(on, _)| *on)
        .map(|(_, name)| *name)
        .collect();
    if enabled.is_empty() {
        "none".to_string()
    } else {
        enabled.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_lines_skip_empty_parts() {
        let message = OutputMessage {
            stdout: "hello".into(),
            error: "boom".into(),
            ..OutputMessage::default()
        };
        assert_eq!(
            output_lines(&message),
            vec![(Stream::Stdout, "hello"), (Stream::Error, "boom")]
        );
        assert!(output_lines(&OutputMessage::default()).is_empty());
    }

    #[test]
    fn rdp_column_reflects_state() {
        let mut vm = Instance {
            name: "vm1".into(),
            ..Instance::default()
        };
        assert_eq!(rdp_column(&vm), "");
        vm.display_private_rdp_dom = true;
        assert_eq!(rdp_column(&vm), "available");
        vm.rdp_running = true;
        assert_eq!(rdp_column(&vm), "running");
    }

    #[test]
    fn capability_summary_lists_enabled_features() {
        let caps = Capabilities {
            rdp: true,
            workflows: true,
            ..Capabilities::default()
        };
        assert_eq!(capability_summary(&caps), "private RDP, workflows");
        assert_eq!(capability_summary(&Capabilities::default()), "none");
    }

    #[test]
    fn instance_table_has_a_row_per_instance() {
        let instances = vec![
            Instance {
                name: "vm1".into(),
                ..Instance::default()
            },
            Instance {
                name: "vm2".into(),
                ..Instance::default()
            },
        ];
        let rendered = instance_table(&instances).to_string();
        assert!(rendered.contains("vm1"));
        assert!(rendered.contains("vm2"));
    }
}
