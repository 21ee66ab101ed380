#![forbid(unsafe_code)]

//! SQLite-backed storage for the GDELT exploration dashboard.
//!
//! Three tables: `COUNTRY` (code/name pairs driving the UI selectors),
//! `GEO_TAG` (deduplicated source/target/action coordinates), and
//! `GDELT_RECORD` (the event rows themselves). Record queries come back as
//! [`DataFrame`]s ready to hand to a query view.

use std::path::Path;

use chrono::NaiveDate;
use gv_columnar::{Column, ColumnError};
use gv_frame::{DataFrame, FrameError};
use gv_types::{DType, NullKind, Scalar};
use rusqlite::{Connection, OptionalExtension, params};
use thiserror::Error;
use tracing::debug;

const DATE_FORMAT: &str = "%Y-%m-%d";

const EXPECTED_TABLES: [&str; 3] = ["GDELT_RECORD", "GEO_TAG", "COUNTRY"];

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS COUNTRY (
    code TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS GEO_TAG (
    geo_id INTEGER PRIMARY KEY,
    geo_type INTEGER NOT NULL,
    geo_lat REAL NOT NULL,
    geo_long REAL NOT NULL
);
CREATE TABLE IF NOT EXISTS GDELT_RECORD (
    record_key INTEGER PRIMARY KEY,
    date TEXT NOT NULL,
    source_id TEXT NOT NULL REFERENCES COUNTRY (code),
    target_id TEXT NOT NULL REFERENCES COUNTRY (code),
    cameo_code INTEGER NOT NULL,
    num_events INTEGER NOT NULL,
    num_arts INTEGER NOT NULL,
    quad_class REAL NOT NULL,
    goldstein REAL,
    source_record_id INTEGER REFERENCES GEO_TAG (geo_id),
    target_record_id INTEGER REFERENCES GEO_TAG (geo_id),
    action_record_id INTEGER REFERENCES GEO_TAG (geo_id)
);
";

const RECORD_COLUMNS: &str = "date, source_id, target_id, cameo_code, num_events, num_arts, \
     quad_class, goldstein, source_record_id, target_record_id, action_record_id";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("country code '{code}' must be three characters long")]
    InvalidCountryCode { code: String },
    #[error("table '{table}' is not part of the store schema")]
    UnknownTable { table: String },
    #[error(transparent)]
    Sql(#[from] rusqlite::Error),
    #[error(transparent)]
    DateParse(#[from] chrono::ParseError),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Country {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeoTag {
    pub geo_id: i64,
    pub geo_type: i64,
    pub geo_lat: f64,
    pub geo_long: f64,
}

/// A GDELT event row awaiting insertion; the primary key is assigned by the
/// store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewGdeltRecord {
    pub date: NaiveDate,
    pub source_id: String,
    pub target_id: String,
    pub cameo_code: i64,
    pub num_events: i64,
    pub num_arts: i64,
    pub quad_class: f64,
    pub goldstein: Option<f64>,
    pub source_record_id: Option<i64>,
    pub target_record_id: Option<i64>,
    pub action_record_id: Option<i64>,
}

struct RawRecord {
    date: String,
    source_id: String,
    target_id: String,
    cameo_code: i64,
    num_events: i64,
    num_arts: i64,
    quad_class: f64,
    goldstein: Option<f64>,
    source_record_id: Option<i64>,
    target_record_id: Option<i64>,
    action_record_id: Option<i64>,
}

#[derive(Debug)]
pub struct Store {
    connection: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            connection: Connection::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Ok(Self {
            connection: Connection::open_in_memory()?,
        })
    }

    /// Create the three dashboard tables when they do not already exist.
    pub fn create_schema(&self) -> Result<(), StoreError> {
        self.connection.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    #[must_use]
    pub fn table_names() -> &'static [&'static str] {
        &EXPECTED_TABLES
    }

    /// Column names of one of the store's tables, for the schema report
    /// page. Only the store's own tables may be asked about.
    pub fn table_columns(&self, table: &str) -> Result<Vec<String>, StoreError> {
        if !EXPECTED_TABLES.contains(&table) {
            return Err(StoreError::UnknownTable {
                table: table.to_owned(),
            });
        }

        let mut statement = self
            .connection
            .prepare(&format!("PRAGMA table_info({table})"))?;
        let columns = statement
            .query_map(params![], |row| row.get::<_, String>(1))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(columns)
    }

    pub fn insert_country(&self, code: &str, name: &str) -> Result<(), StoreError> {
        if code.chars().count() != 3 {
            return Err(StoreError::InvalidCountryCode {
                code: code.to_owned(),
            });
        }

        self.connection.execute(
            "INSERT INTO COUNTRY (code, name) VALUES (?1, ?2)",
            params![code, name],
        )?;
        Ok(())
    }

    pub fn countries(&self) -> Result<Vec<Country>, StoreError> {
        let mut statement = self
            .connection
            .prepare("SELECT code, name FROM COUNTRY ORDER BY code")?;
        let countries = statement
            .query_map(params![], |row| {
                Ok(Country {
                    code: row.get(0)?,
                    name: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(countries)
    }

    pub fn country_by_code(&self, code: &str) -> Result<Option<Country>, StoreError> {
        let country = self
            .connection
            .query_row(
                "SELECT code, name FROM COUNTRY WHERE code = ?1",
                params![code],
                |row| {
                    Ok(Country {
                        code: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(country)
    }

    /// Insert a geo tag, reusing the primary key of an identical
    /// type/latitude/longitude triplet when one is already stored.
    pub fn insert_geo_tag(
        &self,
        geo_type: i64,
        geo_lat: f64,
        geo_long: f64,
    ) -> Result<i64, StoreError> {
        let existing = self
            .connection
            .query_row(
                "SELECT geo_id FROM GEO_TAG \
                 WHERE geo_type = ?1 AND geo_lat = ?2 AND geo_long = ?3",
                params![geo_type, geo_lat, geo_long],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if let Some(geo_id) = existing {
            return Ok(geo_id);
        }

        self.connection.execute(
            "INSERT INTO GEO_TAG (geo_type, geo_lat, geo_long) VALUES (?1, ?2, ?3)",
            params![geo_type, geo_lat, geo_long],
        )?;
        Ok(self.connection.last_insert_rowid())
    }

    pub fn geo_tag_by_id(&self, geo_id: i64) -> Result<Option<GeoTag>, StoreError> {
        let tag = self
            .connection
            .query_row(
                "SELECT geo_id, geo_type, geo_lat, geo_long FROM GEO_TAG WHERE geo_id = ?1",
                params![geo_id],
                |row| {
                    Ok(GeoTag {
                        geo_id: row.get(0)?,
                        geo_type: row.get(1)?,
                        geo_lat: row.get(2)?,
                        geo_long: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(tag)
    }

    pub fn geo_tags(&self) -> Result<DataFrame, StoreError> {
        let mut statement = self
            .connection
            .prepare("SELECT geo_id, geo_type, geo_lat, geo_long FROM GEO_TAG")?;
        let tags = statement
            .query_map(params![], |row| {
                Ok(GeoTag {
                    geo_id: row.get(0)?,
                    geo_type: row.get(1)?,
                    geo_lat: row.get(2)?,
                    geo_long: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut geo_ids = Vec::with_capacity(tags.len());
        let mut geo_types = Vec::with_capacity(tags.len());
        let mut geo_lats = Vec::with_capacity(tags.len());
        let mut geo_longs = Vec::with_capacity(tags.len());
        for tag in tags {
            geo_ids.push(Scalar::Int64(tag.geo_id));
            geo_types.push(Scalar::Int64(tag.geo_type));
            geo_lats.push(Scalar::Float64(tag.geo_lat));
            geo_longs.push(Scalar::Float64(tag.geo_long));
        }

        Ok(DataFrame::new(vec![
            ("geo_id".to_owned(), Column::new(DType::Int64, geo_ids)?),
            ("geo_type".to_owned(), Column::new(DType::Int64, geo_types)?),
            ("geo_lat".to_owned(), Column::new(DType::Float64, geo_lats)?),
            (
                "geo_long".to_owned(),
                Column::new(DType::Float64, geo_longs)?,
            ),
        ])?)
    }

    pub fn insert_record(&self, record: &NewGdeltRecord) -> Result<(), StoreError> {
        self.connection.execute(
            &format!(
                "INSERT INTO GDELT_RECORD ({RECORD_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            record_params(record),
        )?;
        Ok(())
    }

    /// Bulk-insert records inside one transaction. Exists for backend
    /// seeding; the dashboard itself never writes.
    pub fn insert_records(&mut self, records: &[NewGdeltRecord]) -> Result<(), StoreError> {
        let tx = self.connection.transaction()?;
        {
            let mut statement = tx.prepare(&format!(
                "INSERT INTO GDELT_RECORD ({RECORD_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ))?;
            for record in records {
                statement.execute(record_params(record))?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Every GDELT record in the store, as a `DataFrame` with a
    /// `Date`-typed date column.
    pub fn select_all(&self) -> Result<DataFrame, StoreError> {
        debug!("selecting all gdelt records");
        self.query_records(
            &format!("SELECT {RECORD_COLUMNS} FROM GDELT_RECORD"),
            params![],
        )
    }

    /// Records originating from `source_code`, optionally restricted to a
    /// target country of interest (articles from X, or from X about Y).
    pub fn select_by_country(
        &self,
        source_code: &str,
        target_code: Option<&str>,
    ) -> Result<DataFrame, StoreError> {
        debug!(source_code, target_code, "selecting gdelt records by country");

        match target_code {
            Some(target) => self.query_records(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM GDELT_RECORD \
                     WHERE source_id = ?1 AND target_id = ?2"
                ),
                params![source_code, target],
            ),
            None => self.query_records(
                &format!("SELECT {RECORD_COLUMNS} FROM GDELT_RECORD WHERE source_id = ?1"),
                params![source_code],
            ),
        }
    }

    fn query_records(
        &self,
        sql: &str,
        parameters: impl rusqlite::Params,
    ) -> Result<DataFrame, StoreError> {
        let mut statement = self.connection.prepare(sql)?;
        let rows = statement
            .query_map(parameters, |row| {
                Ok(RawRecord {
                    date: row.get(0)?,
                    source_id: row.get(1)?,
                    target_id: row.get(2)?,
                    cameo_code: row.get(3)?,
                    num_events: row.get(4)?,
                    num_arts: row.get(5)?,
                    quad_class: row.get(6)?,
                    goldstein: row.get(7)?,
                    source_record_id: row.get(8)?,
                    target_record_id: row.get(9)?,
                    action_record_id: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        records_frame(rows)
    }
}

type RecordParams = (
    String,
    String,
    String,
    i64,
    i64,
    i64,
    f64,
    Option<f64>,
    Option<i64>,
    Option<i64>,
    Option<i64>,
);

fn record_params(record: &NewGdeltRecord) -> RecordParams {
    (
        record.date.format(DATE_FORMAT).to_string(),
        record.source_id.clone(),
        record.target_id.clone(),
        record.cameo_code,
        record.num_events,
        record.num_arts,
        record.quad_class,
        record.goldstein,
        record.source_record_id,
        record.target_record_id,
        record.action_record_id,
    )
}

fn optional_int(value: Option<i64>) -> Scalar {
    value.map_or(Scalar::Null(NullKind::Null), Scalar::Int64)
}

fn records_frame(rows: Vec<RawRecord>) -> Result<DataFrame, StoreError> {
    let mut dates = Vec::with_capacity(rows.len());
    let mut source_ids = Vec::with_capacity(rows.len());
    let mut target_ids = Vec::with_capacity(rows.len());
    let mut cameo_codes = Vec::with_capacity(rows.len());
    let mut num_events = Vec::with_capacity(rows.len());
    let mut num_arts = Vec::with_capacity(rows.len());
    let mut quad_classes = Vec::with_capacity(rows.len());
    let mut goldsteins = Vec::with_capacity(rows.len());
    let mut source_records = Vec::with_capacity(rows.len());
    let mut target_records = Vec::with_capacity(rows.len());
    let mut action_records = Vec::with_capacity(rows.len());

    for row in rows {
        let date = NaiveDate::parse_from_str(&row.date, DATE_FORMAT)?;
        dates.push(Scalar::Date(date));
        source_ids.push(Scalar::Utf8(row.source_id));
        target_ids.push(Scalar::Utf8(row.target_id));
        cameo_codes.push(Scalar::Int64(row.cameo_code));
        num_events.push(Scalar::Int64(row.num_events));
        num_arts.push(Scalar::Int64(row.num_arts));
        quad_classes.push(Scalar::Float64(row.quad_class));
        goldsteins.push(row.goldstein.map_or(Scalar::Null(NullKind::NaN), Scalar::Float64));
        source_records.push(optional_int(row.source_record_id));
        target_records.push(optional_int(row.target_record_id));
        action_records.push(optional_int(row.action_record_id));
    }

    Ok(DataFrame::new(vec![
        ("date".to_owned(), Column::new(DType::Date, dates)?),
        ("source_id".to_owned(), Column::new(DType::Utf8, source_ids)?),
        ("target_id".to_owned(), Column::new(DType::Utf8, target_ids)?),
        (
            "cameo_code".to_owned(),
            Column::new(DType::Int64, cameo_codes)?,
        ),
        (
            "num_events".to_owned(),
            Column::new(DType::Int64, num_events)?,
        ),
        ("num_arts".to_owned(), Column::new(DType::Int64, num_arts)?),
        (
            "quad_class".to_owned(),
            Column::new(DType::Float64, quad_classes)?,
        ),
        (
            "goldstein".to_owned(),
            Column::new(DType::Float64, goldsteins)?,
        ),
        (
            "source_record_id".to_owned(),
            Column::new(DType::Int64, source_records)?,
        ),
        (
            "target_record_id".to_owned(),
            Column::new(DType::Int64, target_records)?,
        ),
        (
            "action_record_id".to_owned(),
            Column::new(DType::Int64, action_records)?,
        ),
    ])?)
}
