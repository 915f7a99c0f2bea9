use clap::{Arg, ArgAction, Command, value_parser};
use clap_num::maybe_hex;
use exhume_body::{Body, BodySlice};
use exhume_mft::aggregate::aggregate_by_fragments;
use exhume_mft::{NodeView, NtfsReader, RetrieveMode, ScanOptions};
use log::{debug, error, info};
use prettytable::{Table, row};
use serde_json::{Value, json};
use std::fs::File;

fn load_options(path: Option<&String>) -> Result<ScanOptions, String> {
    let Some(path) = path else {
        return Ok(ScanOptions::default());
    };
    let file = File::open(path).map_err(|e| format!("cannot open '{}': {}", path, e))?;
    serde_json::from_reader(file).map_err(|e| format!("invalid configuration '{}': {}", path, e))
}

fn print_nodes(nodes: &[NodeView<'_>], json_output: bool) {
    if json_output {
        let arr: Vec<Value> = nodes.iter().map(NodeView::to_json).collect();
        match serde_json::to_string_pretty(&json!({ "nodes": arr })) {
            Ok(s) => println!("{}", s),
            Err(e) => error!("Error serializing nodes to JSON: {}", e),
        }
        return;
    }

    let mut t = Table::new();
    t.add_row(row![b -> "Inode", b -> "Size", b -> "Dir", b -> "Fragments", b -> "Created", b -> "Path"]);
    for node in nodes {
        let fragments = node
            .streams()
            .ok()
            .and_then(|s| s.first().and_then(|f| f.fragments().ok()).map(|f| f.len()))
            .map(|n| n.to_string())
            .unwrap_or_default();
        let created = node
            .creation_time()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let path = node
            .full_name()
            .map(|p| p.to_string())
            .unwrap_or_else(|e| format!("<{}>", e));
        t.add_row(row![
            node.index(),
            node.size(),
            if node.is_directory() { "d" } else { "" },
            fragments,
            created,
            path
        ]);
    }
    t.printstd();
}

fn main() {
    let matches = Command::new("exhume_mft")
        .version("0.1.0")
        .author("ForensicXlab")
        .about("Rebuild the file and directory tree of an NTFS partition from its MFT.")
        .arg(
            Arg::new("body")
                .short('b')
                .long("body")
                .value_parser(value_parser!(String))
                .required(true)
                .help("The path to the body to exhume."),
        )
        .arg(
            Arg::new("format")
                .short('f')
                .long("format")
                .value_parser(value_parser!(String))
                .required(false)
                .help("The format of the file, either 'raw' or 'ewf'."),
        )
        .arg(
            Arg::new("offset")
                .short('o')
                .long("offset")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("The NTFS partition starts at address (decimal or hex)."),
        )
        .arg(
            Arg::new("size")
                .short('s')
                .long("size")
                .value_parser(maybe_hex::<u64>)
                .required(true)
                .help("The size of the NTFS partition in sectors (decimal or hex)."),
        )
        .arg(
            Arg::new("geometry")
                .long("geometry")
                .action(ArgAction::SetTrue)
                .help("Display the disk geometry read from the boot sector."),
        )
        .arg(
            Arg::new("prefix")
                .short('p')
                .long("prefix")
                .value_parser(value_parser!(String))
                .default_value("")
                .help("Only list nodes whose full path starts with this prefix (case insensitive)."),
        )
        .arg(
            Arg::new("timestamps")
                .long("timestamps")
                .action(ArgAction::SetTrue)
                .help("Retrieve the creation, change and access times."),
        )
        .arg(
            Arg::new("streams")
                .long("streams")
                .action(ArgAction::SetTrue)
                .help("Retrieve the streams of every node."),
        )
        .arg(
            Arg::new("fragments")
                .long("fragments")
                .action(ArgAction::SetTrue)
                .help("Retrieve the streams and their on-disk fragments."),
        )
        .arg(
            Arg::new("fragmented")
                .long("fragmented")
                .value_parser(maybe_hex::<usize>)
                .help("Group the matching nodes by fragment count, keeping counts of at least this value."),
        )
        .arg(
            Arg::new("label")
                .long("label")
                .value_parser(value_parser!(String))
                .help("Volume label prefixed to every path, e.g. 'C:'."),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_parser(value_parser!(String))
                .help("JSON file holding the scan options. Command line flags override it."),
        )
        .arg(
            Arg::new("limit")
                .long("limit")
                .value_parser(value_parser!(usize))
                .help("Maximum number of nodes to display."),
        )
        .arg(
            Arg::new("json")
                .short('j')
                .long("json")
                .action(ArgAction::SetTrue)
                .help("Output the geometry and nodes in JSON format."),
        )
        .arg(
            Arg::new("log_level")
                .short('l')
                .long("log-level")
                .value_parser(["error", "warn", "info", "debug", "trace"])
                .default_value("info")
                .help("Set the log verbosity level"),
        )
        .get_matches();

    let level_filter = match matches.get_one::<String>("log_level").map(String::as_str) {
        Some("error") => log::LevelFilter::Error,
        Some("warn") => log::LevelFilter::Warn,
        Some("debug") => log::LevelFilter::Debug,
        Some("trace") => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new().filter_level(level_filter).init();

    let mut options = match load_options(matches.get_one::<String>("config")) {
        Ok(options) => options,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };
    if matches.get_flag("timestamps") {
        options.retrieve |= RetrieveMode::TIMESTAMPS;
    }
    if matches.get_flag("streams") {
        options.retrieve |= RetrieveMode::STREAMS;
    }
    let fragmented = matches.get_one::<usize>("fragmented").copied();
    if matches.get_flag("fragments") || fragmented.is_some() {
        options.retrieve |= RetrieveMode::STREAMS | RetrieveMode::FRAGMENTS;
    }
    if let Some(label) = matches.get_one::<String>("label") {
        options.volume_label = label.clone();
    }

    let Some(file_path) = matches.get_one::<String>("body") else {
        return;
    };
    let auto = String::from("auto");
    let format = matches.get_one::<String>("format").unwrap_or(&auto);
    let offset = matches.get_one::<u64>("offset").copied().unwrap_or(0);
    let size = matches.get_one::<u64>("size").copied().unwrap_or(0);
    let prefix = matches.get_one::<String>("prefix").cloned().unwrap_or_default();
    let limit = matches.get_one::<usize>("limit").copied().unwrap_or(usize::MAX);
    let json_output = matches.get_flag("json");

    let mut body = Body::new(file_path.to_owned(), format);
    debug!("Created Body from '{}'", file_path);

    let partition_size = size * body.get_sector_size() as u64;
    let mut slice = match BodySlice::new(&mut body, offset, partition_size) {
        Ok(sl) => sl,
        Err(e) => {
            error!("Could not create BodySlice: {}", e);
            return;
        }
    };

    let reader = match NtfsReader::new(&mut slice, options) {
        Ok(reader) => reader,
        Err(e) => {
            error!("Couldn't scan the MFT: {}", e);
            return;
        }
    };

    if matches.get_flag("geometry") {
        if json_output {
            match serde_json::to_string_pretty(&reader.geometry().to_json()) {
                Ok(s) => println!("{}", s),
                Err(e) => error!("Error serializing the geometry to JSON: {}", e),
            }
        } else {
            println!("{}", reader.geometry());
        }
    }

    let nodes = match reader.par_lookup(&prefix) {
        Ok(nodes) => nodes,
        Err(e) => {
            error!("Lookup of '{}' failed: {}", prefix, e);
            return;
        }
    };
    info!("{} nodes match '{}'.", nodes.len(), prefix);

    match fragmented {
        Some(minimum) => {
            let groups = match aggregate_by_fragments(nodes, minimum) {
                Ok(groups) => groups,
                Err(e) => {
                    error!("Could not group nodes by fragments: {}", e);
                    return;
                }
            };
            // most fragmented first
            for (count, group) in groups.iter().rev() {
                if !json_output {
                    println!("{} fragments: {} nodes", count, group.len());
                }
                let shown: Vec<NodeView<'_>> = group.iter().take(limit).copied().collect();
                print_nodes(&shown, json_output);
            }
        }
        None => {
            let shown: Vec<NodeView<'_>> = nodes.into_iter().take(limit).collect();
            print_nodes(&shown, json_output);
        }
    }
}
