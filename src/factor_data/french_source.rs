// SPDX-License-Identifier: MIT
//
// Copyright (c) 2025 Noderr Protocol Foundation
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.

use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::debug;

use super::{
    FactorDataConfig, FactorDataError, FactorDataResult, FactorObservation, FactorReturnSeries,
    FactorSource,
};

/// Rows of one library CSV: date -> column name -> value
type ParsedTable = BTreeMap<NaiveDate, HashMap<String, f64>>;

/// Downloads the daily factor files from the Kenneth French data library
pub struct FrenchLibrarySource {
    client: reqwest::Client,
    five_factor_url: String,
    momentum_url: String,
}

impl FrenchLibrarySource {
    pub fn new(config: &FactorDataConfig) -> FactorDataResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            five_factor_url: config.five_factor_url.clone(),
            momentum_url: config.momentum_url.clone(),
        })
    }

    /// Fetch one file; `.zip` archives are unpacked to their single CSV member
    async fn download(&self, url: &str) -> FactorDataResult<String> {
        debug!("Downloading factor file {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        if url.to_ascii_lowercase().ends_with(".zip") {
            let bytes = response.bytes().await?;
            return extract_single_member(&bytes);
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl FactorSource for FrenchLibrarySource {
    async fn fetch_history(&self) -> FactorDataResult<FactorReturnSeries> {
        let five_factor = parse_library_csv(&self.download(&self.five_factor_url).await?)?;
        let momentum = parse_library_csv(&self.download(&self.momentum_url).await?)?;
        merge_tables(&five_factor, &momentum)
    }
}

/// Read the one file packed in a library archive
pub fn extract_single_member(bytes: &[u8]) -> FactorDataResult<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    if archive.len() != 1 {
        return Err(FactorDataError::Parse(format!(
            "expected one file in factor archive, found {}",
            archive.len()
        )));
    }
    let mut member = archive.by_index(0)?;
    debug!("Extracting {} ({} bytes)", member.name(), member.size());
    let mut raw = Vec::with_capacity(member.size() as usize);
    member.read_to_end(&mut raw)?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Parse a library CSV: free-text preamble, a header row starting with a blank
/// cell, then `YYYYMMDD,v1,v2,...` rows until the first non-date record.
pub fn parse_library_csv(text: &str) -> FactorDataResult<ParsedTable> {
    let Some(offset) = header_offset(text) else {
        return Err(FactorDataError::Parse("no header row found".to_string()));
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text[offset..].as_bytes());
    let mut records = reader.records();

    let columns: Vec<String> = match records.next() {
        Some(header) => header?.iter().skip(1).map(str::to_string).collect(),
        None => return Err(FactorDataError::Parse("no header row found".to_string())),
    };

    let mut table = ParsedTable::new();
    for record in records {
        let record = record?;
        // Annual sections and the copyright footer follow the daily block
        let Some(date) = record.get(0).and_then(parse_date) else {
            if table.is_empty() {
                continue;
            }
            break;
        };
        let mut row = HashMap::with_capacity(columns.len());
        for (name, raw) in columns.iter().zip(record.iter().skip(1)) {
            let value = raw.parse::<f64>().map_err(|_| {
                FactorDataError::Parse(format!("bad value '{}' for {} on {}", raw, name, date))
            })?;
            row.insert(name.clone(), value);
        }
        table.insert(date, row);
    }

    if table.is_empty() {
        return Err(FactorDataError::Parse("no daily rows found".to_string()));
    }
    Ok(table)
}

/// Byte offset of the first line whose leading cell is blank
fn header_offset(text: &str) -> Option<usize> {
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if line.trim_start_matches([' ', '\t']).starts_with(',') {
            return Some(offset);
        }
        offset += line.len();
    }
    None
}

fn parse_date(cell: &str) -> Option<NaiveDate> {
    if cell.len() != 8 || !cell.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    NaiveDate::parse_from_str(cell, "%Y%m%d").ok()
}

/// Inner-join the five-factor and momentum tables on date
pub fn merge_tables(
    five_factor: &ParsedTable,
    momentum: &ParsedTable,
) -> FactorDataResult<FactorReturnSeries> {
    let column = |row: &HashMap<String, f64>, name: &str| -> FactorDataResult<f64> {
        row.get(name)
            .copied()
            .ok_or_else(|| FactorDataError::Parse(format!("missing column {}", name)))
    };

    let mut rows = BTreeMap::new();
    for (date, ff) in five_factor {
        let Some(mom) = momentum.get(date) else {
            continue;
        };
        let umd = match mom.get("Mom").or_else(|| mom.get("UMD")) {
            Some(v) => *v,
            None => return Err(FactorDataError::Parse("missing momentum column".to_string())),
        };
        rows.insert(
            *date,
            FactorObservation {
                mkt_rf: column(ff, "Mkt-RF")?,
                smb: column(ff, "SMB")?,
                hml: column(ff, "HML")?,
                rmw: column(ff, "RMW")?,
                cma: column(ff, "CMA")?,
                umd,
                rf: column(ff, "RF")?,
            },
        );
    }
    Ok(FactorReturnSeries::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIVE_FACTOR: &str = "This file was created using the 202401 CRSP database.\n\
The Tbill return is the simple daily rate.\n\
\n\
,Mkt-RF,SMB,HML,RMW,CMA,RF\n\
20240102,   -0.71,    0.89,    0.42,    0.25,    0.31,   0.021\n\
20240103,   -0.98,   -0.25,    0.11,    0.03,    0.18,   0.021\n\
20240104,   -0.26,    0.05,    0.21,   -0.12,    0.09,   0.021\n\
\n\
Copyright 2024 Kenneth R. French\n";

    const MOMENTUM: &str = "Momentum factor daily\n\
\n\
,Mom   \n\
20240103,    1.10\n\
20240104,   -0.40\n\
20240105,    0.20\n";

    #[test]
    fn test_parse_library_csv() {
        let table = parse_library_csv(FIVE_FACTOR).unwrap();
        assert_eq!(table.len(), 3);
        let first = &table[&NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()];
        assert!((first["Mkt-RF"] + 0.71).abs() < 1e-12);
        assert!((first["RF"] - 0.021).abs() < 1e-12);
    }

    #[test]
    fn test_merge_inner_joins_on_date() {
        let ff = parse_library_csv(FIVE_FACTOR).unwrap();
        let mom = parse_library_csv(MOMENTUM).unwrap();
        let merged = merge_tables(&ff, &mom).unwrap();
        assert_eq!(merged.len(), 2);
        let row = merged.get(&NaiveDate::from_ymd_opt(2024, 1, 3).unwrap()).unwrap();
        assert!((row.umd - 1.10).abs() < 1e-12);
        assert!((row.cma - 0.18).abs() < 1e-12);
    }

    #[test]
    fn test_parse_rejects_empty_file() {
        assert!(parse_library_csv("no data here\n").is_err());
        assert!(parse_library_csv("preamble\n,Mkt-RF,RF\n").is_err());
    }

    #[test]
    fn test_parse_stops_before_annual_section() {
        let text = "Monthly and annual returns, in percent\r\n\
\r\n\
  ,Mkt-RF,SMB,HML,RMW,CMA,RF\r\n\
20231229,  -0.10,  0.20,  0.30,  0.10,  0.00,  0.021\r\n\
\r\n\
 Annual Factors: January-December \r\n\
,Mkt-RF,SMB,HML,RMW,CMA,RF\r\n\
2023,  21.69,  -3.72,  -13.04,  2.87,  -9.45,  5.01\r\n";
        let table = parse_library_csv(text).unwrap();
        assert_eq!(table.len(), 1);
        let row = &table[&NaiveDate::from_ymd_opt(2023, 12, 29).unwrap()];
        assert!((row["SMB"] - 0.20).abs() < 1e-12);
        assert_eq!(row.len(), 6);
    }

    #[test]
    fn test_parse_reports_bad_values() {
        let text = ",Mkt-RF,RF\n20240102,abc,0.02\n";
        let err = parse_library_csv(text).unwrap_err();
        assert!(err.to_string().contains("abc"));
    }

    fn archive(members: &[(&str, &str)]) -> Vec<u8> {
        use std::io::Write;

        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in members {
            writer.start_file(*name, zip::write::FileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_single_member_archive() {
        let bytes = archive(&[("F-F_Momentum_Factor_daily.CSV", MOMENTUM)]);
        let text = extract_single_member(&bytes).unwrap();
        let table = parse_library_csv(&text).unwrap();
        assert_eq!(table.len(), 3);

        let two = archive(&[("a.CSV", MOMENTUM), ("b.CSV", MOMENTUM)]);
        assert!(extract_single_member(&two).is_err());
        assert!(matches!(
            extract_single_member(b"not a zip"),
            Err(FactorDataError::Archive(_))
        ));
    }
}
