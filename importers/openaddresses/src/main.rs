use std::env;
use std::process;

use openaddresses::{import_file, AddressSink, Archive, UnknownLicensePolicy};
use tools::{teprintln, tprintln, Address};

/// Only counts rows, nothing is kept in memory.
#[derive(Default)]
struct Counter(u64);

impl AddressSink for Counter {
    fn insert(&mut self, _addr: Address) {
        self.0 += 1;
    }
}

fn run(path: &str) -> openaddresses::Result<()> {
    let archive = Archive::open(path)?;
    let files = archive.data_files()?;

    match archive.licenses(&files, UnknownLicensePolicy::Retain) {
        Ok(licenses) => {
            tprintln!("Found {} license records", licenses.len());

            for license in licenses {
                println!(
                    "  {} => {} ({}){}",
                    license.source,
                    license.license,
                    license.website,
                    if license.attribution.is_empty() {
                        String::new()
                    } else {
                        format!(", attribution: {}", license.attribution)
                    }
                );
            }
        }
        Err(err) => teprintln!("{}", err),
    }

    let mut total = Counter::default();

    for file in &files {
        let mut counter = Counter::default();

        match import_file(&archive, file, &mut counter) {
            Ok(stats) => {
                println!("  {} => {} rows, {} skipped", file.name, stats.rows, stats.skipped);
                total.0 += counter.0;
            }
            Err(err) => teprintln!("Failed to read {}: {}", file.name, err),
        }
    }

    tprintln!("Got {} addresses in {} files", total.0, files.len());
    Ok(())
}

fn main() {
    let args = env::args().collect::<Vec<String>>();
    if args.len() < 2 {
        eprintln!("Expected an OpenAddresses archive or folder");
        process::exit(1);
    }

    if let Err(err) = run(&args[1]) {
        teprintln!("{}", err);
        process::exit(1);
    }
}
