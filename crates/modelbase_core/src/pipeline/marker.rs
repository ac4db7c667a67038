//! Per-stage processed markers in `_pipeline_markers`.

use crate::codec::{encode_timestamp, CodecError};
use crate::error::StoreResult;
use crate::model::ItemId;
use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

/// Outcome recorded for an item once a stage has handled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStatus {
    Done,
    Failed,
}

impl MarkerStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

pub(crate) fn mark(
    conn: &Connection,
    stage: &str,
    model: &str,
    id: ItemId,
    status: MarkerStatus,
    detail: Option<&str>,
) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO _pipeline_markers (stage, model, item_uuid, status, detail, marked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(stage, model, item_uuid) DO UPDATE SET
             status = excluded.status,
             detail = excluded.detail,
             marked_at = excluded.marked_at;",
        params![
            stage,
            model,
            id.to_string(),
            status.as_str(),
            detail,
            encode_timestamp(OffsetDateTime::now_utc())?
        ],
    )?;
    Ok(())
}

/// Status and detail message of one item's marker.
pub(crate) fn status(
    conn: &Connection,
    stage: &str,
    model: &str,
    id: ItemId,
) -> StoreResult<Option<(MarkerStatus, Option<String>)>> {
    let row = conn
        .query_row(
            "SELECT status, detail FROM _pipeline_markers
             WHERE stage = ?1 AND model = ?2 AND item_uuid = ?3;",
            params![stage, model, id.to_string()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, Option<String>>(1)?)),
        )
        .optional()?;
    let Some((raw, detail)) = row else {
        return Ok(None);
    };
    let status = MarkerStatus::parse(&raw).ok_or_else(|| CodecError::Malformed {
        field: "status".to_string(),
        message: format!("unknown marker status `{raw}`"),
    })?;
    Ok(Some((status, detail)))
}

/// Deletes the failed markers of `stage`, returning how many were cleared.
pub(crate) fn reset_failed(conn: &Connection, stage: &str) -> StoreResult<u64> {
    let cleared = conn.execute(
        "DELETE FROM _pipeline_markers WHERE stage = ?1 AND status = 'failed';",
        [stage],
    )?;
    Ok(cleared as u64)
}

pub(crate) fn count(conn: &Connection, stage: &str, status: MarkerStatus) -> StoreResult<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM _pipeline_markers WHERE stage = ?1 AND status = ?2;",
        params![stage, status.as_str()],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

#[cfg(test)]
mod tests {
    use super::{count, mark, reset_failed, status, MarkerStatus};
    use crate::db::open_db_in_memory;
    use crate::error::StoreError;
    use uuid::Uuid;

    #[test]
    fn marking_twice_keeps_the_latest_status() {
        let conn = open_db_in_memory().expect("open db");
        let id = Uuid::new_v4();
        mark(&conn, "unzip", "file", id, MarkerStatus::Failed, Some("bad crc")).expect("mark");
        assert_eq!(
            status(&conn, "unzip", "file", id).expect("status"),
            Some((MarkerStatus::Failed, Some("bad crc".to_string())))
        );

        mark(&conn, "unzip", "file", id, MarkerStatus::Done, None).expect("mark");
        assert_eq!(
            status(&conn, "unzip", "file", id).expect("status"),
            Some((MarkerStatus::Done, None))
        );
        assert_eq!(count(&conn, "unzip", MarkerStatus::Done).expect("count"), 1);
    }

    #[test]
    fn reset_failed_only_clears_failed_markers_of_one_stage() {
        let conn = open_db_in_memory().expect("open db");
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        mark(&conn, "unzip", "file", a, MarkerStatus::Failed, Some("x")).expect("mark");
        mark(&conn, "unzip", "file", b, MarkerStatus::Done, None).expect("mark");
        mark(&conn, "sniff", "file", c, MarkerStatus::Failed, Some("y")).expect("mark");

        assert_eq!(reset_failed(&conn, "unzip").expect("reset"), 1);
        assert_eq!(status(&conn, "unzip", "file", a).expect("status"), None);
        assert!(status(&conn, "unzip", "file", b).expect("status").is_some());
        assert!(status(&conn, "sniff", "file", c).expect("status").is_some());
    }

    #[test]
    fn unknown_stored_status_is_a_codec_error() {
        let conn = open_db_in_memory().expect("open db");
        let id = Uuid::new_v4();
        mark(&conn, "unzip", "file", id, MarkerStatus::Done, None).expect("mark");
        conn.execute("UPDATE _pipeline_markers SET status = 'paused';", [])
            .expect("corrupt status");

        let err = status(&conn, "unzip", "file", id).unwrap_err();
        assert!(matches!(err, StoreError::Codec(_)));
    }
}
