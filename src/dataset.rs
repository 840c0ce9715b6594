//! Workbook loading and write-back.
//!
//! A [`Dataset`] is the first sheet of an uploaded workbook: a header row
//! followed by data rows. Cells are typed once at load time into
//! [`CellValue`]; typed records and the display projection are read from
//! there, so nothing downstream looks columns up by string on raw cells.

use crate::errors::AppError;
use crate::models::{CustomerVehicleRecord, SensorField, DISPLAY_FIELDS};
use calamine::{open_workbook_auto, open_workbook_auto_from_rs, Data, Reader, Sheets};
use chrono::{NaiveDateTime, NaiveTime};
use rust_xlsxwriter::{Format, Workbook};
use serde_json::{Map, Value};
use std::io::{Cursor, Read, Seek};
use std::path::Path;

const DEFAULT_SHEET_NAME: &str = "Sheet1";
const DATE_FORMAT: &str = "yyyy-mm-dd";
const DATE_TIME_FORMAT: &str = "yyyy-mm-dd hh:mm:ss";

/// A single typed spreadsheet cell.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Empty,
    Text(String),
    Integer(i64),
    Number(f64),
    Bool(bool),
    /// Date or timestamp cell; written back with a date format.
    DateTime(NaiveDateTime),
}

impl CellValue {
    fn from_data(data: &Data) -> Self {
        match data {
            Data::Empty | Data::Error(_) => CellValue::Empty,
            Data::String(s) if s.is_empty() => CellValue::Empty,
            Data::String(s) => CellValue::Text(s.clone()),
            Data::Int(i) => CellValue::Integer(*i),
            Data::Float(f) if f.is_nan() => CellValue::Empty,
            Data::Float(f) => CellValue::Number(*f),
            Data::Bool(b) => CellValue::Bool(*b),
            Data::DateTime(dt) => match dt.as_datetime() {
                Some(ts) => CellValue::DateTime(ts),
                None => CellValue::Number(dt.as_f64()),
            },
            Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, CellValue::Empty)
    }

    /// Text form used for key matching and string fields.
    ///
    /// Integral numbers render without a fractional part, so a customer id
    /// stored as `1042.0` reads as `"1042"`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            CellValue::Empty => None,
            CellValue::Text(s) => Some(s.clone()),
            CellValue::Integer(i) => Some(i.to_string()),
            CellValue::Number(n) => Some(match integral(*n) {
                Some(i) => i.to_string(),
                None => n.to_string(),
            }),
            CellValue::Bool(b) => Some(b.to_string()),
            CellValue::DateTime(ts) => Some(format_timestamp(ts)),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Integer(i) => Some(*i as f64),
            CellValue::Number(n) => Some(*n),
            CellValue::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            CellValue::Empty | CellValue::Bool(_) | CellValue::DateTime(_) => None,
        }
    }

    /// Integer value; numbers with a fractional part are rejected.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            CellValue::Integer(i) => Some(*i),
            CellValue::Number(n) => integral(*n),
            CellValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().and_then(integral))
            }
            CellValue::Empty | CellValue::Bool(_) | CellValue::DateTime(_) => None,
        }
    }

    /// JSON form for the display projection; empty cells become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            CellValue::Empty => Value::Null,
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Integer(i) => Value::from(*i),
            CellValue::Number(n) => match integral(*n) {
                Some(i) => Value::from(i),
                None => serde_json::Number::from_f64(*n)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            },
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::DateTime(ts) => Value::String(format_timestamp(ts)),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        if value.is_empty() {
            CellValue::Empty
        } else {
            CellValue::Text(value.to_string())
        }
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::Integer(value)
    }
}

impl From<f64> for CellValue {
    fn from(value: f64) -> Self {
        CellValue::Number(value)
    }
}

/// Dates without a time of day render as `YYYY-MM-DD`.
fn format_timestamp(ts: &NaiveDateTime) -> String {
    if ts.time() == NaiveTime::MIN {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

fn integral(n: f64) -> Option<i64> {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 9.0e15 {
        Some(n as i64)
    } else {
        None
    }
}

/// First sheet of a customer/vehicle workbook.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    sheet_name: String,
    headers: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Dataset {
    /// Builds a dataset from already-typed cells.
    ///
    /// Fails when neither a `vin` nor a `customer_id` column exists, since no
    /// lookup could ever succeed.
    pub fn from_rows(
        sheet_name: impl Into<String>,
        headers: Vec<String>,
        rows: Vec<Vec<CellValue>>,
    ) -> Result<Self, AppError> {
        let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();

        if !headers.iter().any(|h| h == "vin" || h == "customer_id") {
            return Err(AppError::Validation(
                "Spreadsheet has neither a 'vin' nor a 'customer_id' column".to_string(),
            ));
        }

        let rows = rows
            .into_iter()
            .map(|mut row| {
                if row.len() < headers.len() {
                    row.resize(headers.len(), CellValue::Empty);
                }
                row
            })
            .collect();

        Ok(Self {
            sheet_name: sheet_name.into(),
            headers,
            rows,
        })
    }

    /// Parses the first sheet of an uploaded workbook.
    pub fn from_xlsx_bytes(bytes: &[u8]) -> Result<Self, AppError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))?;
        Self::from_workbook(&mut workbook)
    }

    /// Opens a workbook on disk and parses its first sheet.
    pub fn open(path: &Path) -> Result<Self, AppError> {
        let mut workbook = open_workbook_auto(path)?;
        Self::from_workbook(&mut workbook)
    }

    fn from_workbook<RS: Read + Seek>(workbook: &mut Sheets<RS>) -> Result<Self, AppError> {
        let sheet_name = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| AppError::InvalidDataset("workbook has no sheets".to_string()))?;

        let range = workbook
            .worksheet_range_at(0)
            .ok_or_else(|| AppError::InvalidDataset("workbook has no sheets".to_string()))??;

        let mut rows = range.rows();
        let headers: Vec<String> = rows
            .next()
            .ok_or_else(|| AppError::InvalidDataset("first sheet is empty".to_string()))?
            .iter()
            .map(|cell| CellValue::from_data(cell).as_text().unwrap_or_default())
            .collect();

        let data: Vec<Vec<CellValue>> = rows
            .map(|row| row.iter().map(CellValue::from_data).collect())
            .collect();

        tracing::debug!(
            "Loaded sheet '{}' with {} columns and {} rows",
            sheet_name,
            headers.len(),
            data.len()
        );

        Self::from_rows(sheet_name, headers, data)
    }

    pub fn sheet_name(&self) -> &str {
        &self.sheet_name
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Number of data rows (header excluded).
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    /// Cell at `row` in column `column`; `None` when the column is absent.
    pub fn cell(&self, row: usize, column: &str) -> Option<&CellValue> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.get(col)
    }

    pub fn text(&self, row: usize, column: &str) -> Option<String> {
        self.cell(row, column).and_then(CellValue::as_text)
    }

    fn number(&self, row: usize, column: &str) -> Option<f64> {
        self.cell(row, column).and_then(CellValue::as_f64)
    }

    /// Typed view of one data row.
    pub fn record(&self, row: usize) -> CustomerVehicleRecord {
        let mut record = CustomerVehicleRecord {
            vin: self.text(row, "vin"),
            customer_id: self.text(row, "customer_id"),
            first_name: self.text(row, "first_name"),
            last_name: self.text(row, "last_name"),
            customer_age: self.number(row, "customer_age"),
            country: self.text(row, "country"),
            city: self.text(row, "city"),
            brand: self.text(row, "brand"),
            model: self.text(row, "model"),
            car_age: self.number(row, "car_age"),
            mileage: self.number(row, "mileage"),
            mileage_year: self.number(row, "mileage_year"),
            dealer_assignment: self.text(row, "dealer_assignment"),
            dealer_assignment_status: self.text(row, "dealer_assignment_status"),
            lead_score_loyalty: self.number(row, "lead_score_loyalty"),
            lead_score_profit: self.number(row, "lead_score_profit"),
            customer_persona: self.text(row, "customer_persona"),
            last_service_date: self.text(row, "last_service_date"),
            mail_content: self.text(row, crate::models::MAIL_CONTENT_COLUMN),
            ..Default::default()
        };

        for sensor in SensorField::ALL {
            let value = match self.cell(row, sensor.column()) {
                Some(cell) if !cell.is_empty() => {
                    let code = cell.as_i64();
                    if code.is_none() {
                        tracing::debug!(
                            "Row {}: ignoring non-integer {} value {:?}",
                            row,
                            sensor.column(),
                            cell
                        );
                    }
                    code
                }
                _ => None,
            };
            record.sensors.set(sensor, value);
        }

        record
    }

    /// Ordered display projection of one row.
    ///
    /// Follows [`DISPLAY_FIELDS`], skips columns the dataset lacks and
    /// renders empty cells as `null`.
    pub fn projection(&self, row: usize) -> Map<String, Value> {
        DISPLAY_FIELDS
            .iter()
            .filter_map(|field| {
                self.cell(row, field)
                    .map(|cell| (field.to_string(), cell.to_json()))
            })
            .collect()
    }

    /// Overwrites one cell, appending the column when the sheet lacks it.
    pub fn set_cell(
        &mut self,
        row: usize,
        column: &str,
        value: CellValue,
    ) -> Result<(), AppError> {
        if row >= self.rows.len() {
            return Err(AppError::Internal(format!(
                "row {} out of range ({} rows)",
                row,
                self.rows.len()
            )));
        }

        let col = match self.column_index(column) {
            Some(col) => col,
            None => {
                self.headers.push(column.to_string());
                for r in &mut self.rows {
                    r.push(CellValue::Empty);
                }
                self.headers.len() - 1
            }
        };

        self.rows[row][col] = value;
        Ok(())
    }

    /// Serialises the sheet as a single-sheet xlsx workbook.
    pub fn to_xlsx_bytes(&self) -> Result<Vec<u8>, AppError> {
        let xlsx_err = |e: rust_xlsxwriter::XlsxError| {
            AppError::Persistence(format!("failed to build workbook: {}", e))
        };

        let date_format = Format::new().set_num_format(DATE_FORMAT);
        let date_time_format = Format::new().set_num_format(DATE_TIME_FORMAT);

        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        let name = if self.sheet_name.is_empty() {
            DEFAULT_SHEET_NAME
        } else {
            self.sheet_name.as_str()
        };
        worksheet.set_name(name).map_err(xlsx_err)?;

        for (col, header) in self.headers.iter().enumerate() {
            worksheet
                .write_string(0, col as u16, header.as_str())
                .map_err(xlsx_err)?;
        }

        for (r, row) in self.rows.iter().enumerate() {
            let sheet_row = (r + 1) as u32;
            for (c, cell) in row.iter().enumerate() {
                let col = c as u16;
                match cell {
                    CellValue::Empty => continue,
                    CellValue::Text(s) => worksheet.write_string(sheet_row, col, s.as_str()),
                    CellValue::Integer(i) => worksheet.write_number(sheet_row, col, *i as f64),
                    CellValue::Number(n) => worksheet.write_number(sheet_row, col, *n),
                    CellValue::Bool(b) => worksheet.write_boolean(sheet_row, col, *b),
                    CellValue::DateTime(ts) => {
                        let format = if ts.time() == NaiveTime::MIN {
                            &date_format
                        } else {
                            &date_time_format
                        };
                        worksheet.write_datetime_with_format(sheet_row, col, ts, format)
                    }
                }
                .map_err(xlsx_err)?;
            }
        }

        workbook.save_to_buffer().map_err(xlsx_err)
    }
}
