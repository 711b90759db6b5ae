//! Diesel row types and their conversions to domain models.

use diesel::prelude::*;

use super::util::{deserialization_error, format_ts, format_ts_opt, parse_ts, parse_ts_opt};
use crate::abid::Abid;
use crate::models::{
    HistoryEntry, HistoryRecord, HistoryStatus, Job, JobStatus, Link, LinkStatus,
};
use crate::schema;

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::links)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LinkRecord {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub tags: String,
    pub title: Option<String>,
    pub created_at: String,
    pub status: String,
    pub retry_at: Option<String>,
    pub end_ts: Option<String>,
    pub tie_break: String,
    pub options: String,
}

/// Owned insert row; JSON columns are serialized up front.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::links)]
pub struct NewLink {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub tags: String,
    pub title: Option<String>,
    pub created_at: String,
    pub status: String,
    pub retry_at: Option<String>,
    pub end_ts: Option<String>,
    pub tie_break: String,
    pub options: String,
}

impl NewLink {
    pub fn from_link(link: &Link) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: link.id.to_string(),
            url: link.url.clone(),
            domain: link.domain.clone(),
            tags: serde_json::to_string(&link.tags)?,
            title: link.title.clone(),
            created_at: format_ts(link.created_at),
            status: link.status.as_str().to_string(),
            retry_at: format_ts_opt(link.retry_at),
            end_ts: format_ts_opt(link.end_ts),
            tie_break: link.tie_break.clone(),
            options: serde_json::to_string(&link.options)?,
        })
    }
}

impl TryFrom<LinkRecord> for Link {
    type Error = diesel::result::Error;

    fn try_from(record: LinkRecord) -> Result<Self, Self::Error> {
        Ok(Link {
            id: parse_abid(&record.id)?,
            url: record.url,
            domain: record.domain,
            tags: serde_json::from_str(&record.tags)
                .map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))?,
            title: record.title,
            created_at: parse_ts(&record.created_at)?,
            status: LinkStatus::from_str(&record.status).ok_or_else(|| {
                deserialization_error(format!("Invalid link status: '{}'", record.status))
            })?,
            retry_at: parse_ts_opt(record.retry_at)?,
            end_ts: parse_ts_opt(record.end_ts)?,
            tie_break: record.tie_break,
            options: serde_json::from_str(&record.options)
                .map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))?,
        })
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::jobs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobRecord {
    pub id: String,
    pub link_id: String,
    pub extractor: String,
    pub status: String,
    pub retries: i32,
    pub cmd: String,
    pub cmd_version: Option<String>,
    pub pwd: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub start_ts: Option<String>,
    pub end_ts: Option<String>,
    pub retry_at: Option<String>,
    pub tie_break: String,
}

#[derive(Insertable, AsChangeset, Debug)]
#[diesel(table_name = schema::jobs)]
#[diesel(treat_none_as_null = true)]
pub struct NewJob {
    pub id: String,
    pub link_id: String,
    pub extractor: String,
    pub status: String,
    pub retries: i32,
    pub cmd: String,
    pub cmd_version: Option<String>,
    pub pwd: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub created_at: String,
    pub start_ts: Option<String>,
    pub end_ts: Option<String>,
    pub retry_at: Option<String>,
    pub tie_break: String,
}

impl NewJob {
    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        Ok(Self {
            id: job.id.to_string(),
            link_id: job.link_id.to_string(),
            extractor: job.extractor.clone(),
            status: job.status.as_str().to_string(),
            retries: i32::try_from(job.retries).unwrap_or(i32::MAX),
            cmd: serde_json::to_string(&job.cmd)?,
            cmd_version: job.cmd_version.clone(),
            pwd: job.pwd.clone(),
            output: job.output.clone(),
            error: job.error.clone(),
            created_at: format_ts(job.created_at),
            start_ts: format_ts_opt(job.start_ts),
            end_ts: format_ts_opt(job.end_ts),
            retry_at: format_ts_opt(job.retry_at),
            tie_break: job.tie_break.clone(),
        })
    }
}

impl TryFrom<JobRecord> for Job {
    type Error = diesel::result::Error;

    fn try_from(record: JobRecord) -> Result<Self, Self::Error> {
        Ok(Job {
            id: parse_abid(&record.id)?,
            link_id: parse_abid(&record.link_id)?,
            extractor: record.extractor,
            status: JobStatus::from_str(&record.status).ok_or_else(|| {
                deserialization_error(format!("Invalid job status: '{}'", record.status))
            })?,
            retries: record.retries.max(0) as u32,
            cmd: serde_json::from_str(&record.cmd)
                .map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))?,
            cmd_version: record.cmd_version,
            pwd: record.pwd,
            output: record.output,
            error: record.error,
            created_at: parse_ts(&record.created_at)?,
            start_ts: parse_ts_opt(record.start_ts)?,
            end_ts: parse_ts_opt(record.end_ts)?,
            retry_at: parse_ts_opt(record.retry_at)?,
            tie_break: record.tie_break,
        })
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::archive_results)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ArchiveResultRecord {
    pub id: i32,
    pub link_id: String,
    pub extractor: String,
    pub timestamp: String,
    pub status: String,
    pub duration_ms: i64,
    pub cmd: String,
    pub cmd_version: Option<String>,
    pub output: Option<String>,
    pub error: Option<String>,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::archive_results)]
pub struct NewArchiveResult<'a> {
    pub link_id: &'a str,
    pub extractor: &'a str,
    pub timestamp: String,
    pub status: &'a str,
    pub duration_ms: i64,
    pub cmd: String,
    pub cmd_version: Option<&'a str>,
    pub output: Option<&'a str>,
    pub error: Option<&'a str>,
}

impl TryFrom<ArchiveResultRecord> for HistoryRecord {
    type Error = diesel::result::Error;

    fn try_from(record: ArchiveResultRecord) -> Result<Self, Self::Error> {
        Ok(HistoryRecord {
            link_id: parse_abid(&record.link_id)?,
            extractor: record.extractor,
            entry: HistoryEntry {
                timestamp: parse_ts(&record.timestamp)?,
                status: HistoryStatus::from_str(&record.status).ok_or_else(|| {
                    deserialization_error(format!("Invalid history status: '{}'", record.status))
                })?,
                duration_ms: record.duration_ms.max(0) as u64,
                cmd: serde_json::from_str(&record.cmd)
                    .map_err(|e| diesel::result::Error::DeserializationError(Box::new(e)))?,
                cmd_version: record.cmd_version,
                output: record.output,
                error: record.error,
            },
        })
    }
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = schema::latest_outputs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LatestOutputRecord {
    pub link_id: String,
    pub extractor: String,
    pub output: String,
    pub updated_at: String,
}

#[derive(Insertable, Debug)]
#[diesel(table_name = schema::latest_outputs)]
pub struct NewLatestOutput<'a> {
    pub link_id: &'a str,
    pub extractor: &'a str,
    pub output: &'a str,
    pub updated_at: String,
}

fn parse_abid(s: &str) -> Result<Abid, diesel::result::Error> {
    s.parse::<Abid>()
        .map_err(|e| deserialization_error(format!("Invalid identifier '{}': {}", s, e)))
}
