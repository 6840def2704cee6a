// src/bin/csv_points.rs

//! Loads labelled 2-D points from a CSV file into an M-Tree and writes a
//! `label=(x,y)` listing of the indexed points to an output file.
//!
//! Expects a header line followed by `order,label,x,y` rows. Input and
//! output paths can be overridden on the command line:
//!
//! ```text
//! csv_points [input.csv] [output.txt]
//! ```

use std::collections::BTreeSet;
use std::env;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::ExitCode;

use oximtree::{MTree, Point};

const DEFAULT_INPUT: &str = "tabla1.csv";
const DEFAULT_OUTPUT: &str = "salida.txt";

fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let input_path = args.next().unwrap_or_else(|| DEFAULT_INPUT.to_string());
    let output_path = args.next().unwrap_or_else(|| DEFAULT_OUTPUT.to_string());

    match run(&input_path, &output_path) {
        Ok(count) => {
            println!("indexed {count} points from {input_path} into {output_path}");
            ExitCode::SUCCESS
        }
        Err(error) => {
            eprintln!("csv_points: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(input_path: &str, output_path: &str) -> Result<usize, Box<dyn std::error::Error>> {
    let input = BufReader::new(File::open(input_path)?);
    let mut output = BufWriter::new(File::create(output_path)?);

    let mut tree: MTree<Point> = MTree::with_capacity(oximtree::DEFAULT_MIN_NODE_CAPACITY, None)?;
    // The index forbids duplicate keys; repeated coordinates are only listed.
    let mut seen = BTreeSet::new();

    let mut lines = input.lines();
    // Skip the header row.
    lines.next().transpose()?;

    let mut count = 0;
    for line in lines {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let mut fields = line.split(',');
        let _order = fields.next();
        let label = fields
            .next()
            .ok_or_else(|| format!("missing label column in row: {line}"))?;
        let x: f64 = fields
            .next()
            .ok_or_else(|| format!("missing x column in row: {line}"))?
            .trim()
            .parse()?;
        let y: f64 = fields
            .next()
            .ok_or_else(|| format!("missing y column in row: {line}"))?
            .trim()
            .parse()?;

        let point = Point::from((x, y));
        if seen.insert(point.clone()) {
            tree.add(point);
        }
        writeln!(output, "{label}=({x},{y})")?;
        count += 1;
    }

    output.flush()?;
    Ok(count)
}
