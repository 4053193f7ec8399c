//! Opdb persistence (§6 Persisted state): `sps_visit`/`sps_exposure` rows,
//! plus the pfsConfig design-id lookup. Grounded on the source's
//! `utils/opdb.py::OpDB.insert` (one INSERT per call, no ORM) and
//! `designId.py::getPfsDesignIdAndName` (DB lookup, falling back to a
//! filesystem glob, falling back to `(0, "")`).

use std::path::Path;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use time::OffsetDateTime;

use sps_exposure_core::CameraId;

use crate::detector::ReadOutcome;

pub async fn connect(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new().max_connections(5).connect(database_url).await
}

/// `INSERT INTO sps_visit(pfs_visit_id, exp_type) VALUES ($1, $2)`.
pub async fn insert_visit(pool: &PgPool, visit: u64, exptype: &str) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO sps_visit (pfs_visit_id, exp_type) VALUES ($1, $2)")
        .bind(visit as i64)
        .bind(exptype)
        .execute(pool)
        .await?;
    Ok(())
}

/// One `INSERT INTO sps_exposure(...)` per camera that produced data.
pub async fn insert_exposures(pool: &PgPool, visit: u64, outcomes: &[ReadOutcome]) -> Result<(), sqlx::Error> {
    for outcome in outcomes {
        insert_exposure(pool, visit, outcome).await?;
    }
    Ok(())
}

async fn insert_exposure(pool: &PgPool, visit: u64, outcome: &ReadOutcome) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO sps_exposure \
         (pfs_visit_id, sps_camera_id, exptime, time_exp_start, time_exp_end, beam_config_date) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(visit as i64)
    .bind(outcome.cam.cam_id() as i32)
    .bind(outcome.exptime)
    .bind(outcome.time_exp_start)
    .bind(outcome.time_exp_end)
    .bind(outcome.beam_config_date)
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct PfsDesign {
    pub design_id: i64,
    pub design_name: String,
}

/// DB lookup first, then a filesystem glob for the sidecar
/// `pfsConfig-<designId:016x>-<visit:06d>.fits`-shaped file, then the
/// `(0, "")` default. Reading the full FITS header is out of scope; the
/// sidecar only needs to carry the same two fields.
pub async fn pfs_design_for_visit(pool: &PgPool, raw_data_path: &str, visit: u64) -> PfsDesign {
    if let Ok(design) = pfs_design_from_db(pool, visit).await {
        return design;
    }
    if let Some(design) = pfs_design_from_filesystem(raw_data_path, visit) {
        return design;
    }
    PfsDesign::default()
}

async fn pfs_design_from_db(pool: &PgPool, visit: u64) -> Result<PfsDesign, sqlx::Error> {
    let row: (i64, String) = sqlx::query_as(
        "SELECT pfs_design_id, design_name FROM pfs_config WHERE pfs_visit_id = $1 LIMIT 1",
    )
    .bind(visit as i64)
    .fetch_one(pool)
    .await?;
    Ok(PfsDesign { design_id: row.0, design_name: row.1 })
}

fn pfs_design_from_filesystem(raw_data_path: &str, visit: u64) -> Option<PfsDesign> {
    let pattern = format!("{raw_data_path}/*/pfsConfig/pfsConfig-*-{visit:06}.fits");
    let path = glob::glob(&pattern).ok()?.filter_map(Result::ok).next()?;
    parse_sidecar(&path)
}

/// The sidecar format this crate understands in place of a full FITS
/// reader: `<designId:016x> <designName>` on a single line.
fn parse_sidecar(path: &Path) -> Option<PfsDesign> {
    let contents = std::fs::read_to_string(path).ok()?;
    let mut parts = contents.trim().splitn(2, ' ');
    let design_id = i64::from_str_radix(parts.next()?, 16).ok()?;
    let design_name = parts.next().unwrap_or_default().to_owned();
    Some(PfsDesign { design_id, design_name })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sps_exposure_core::Arm;

    #[test]
    fn sidecar_parses_hex_design_id_and_name() {
        let dir = std::env::temp_dir().join(format!("pfsconfig-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("pfsConfig-0000000000001234-012345.fits");
        std::fs::write(&path, "1234 test-field\n").unwrap();
        let design = parse_sidecar(&path).unwrap();
        assert_eq!(design.design_id, 0x1234);
        assert_eq!(design.design_name, "test-field");
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn missing_sidecar_yields_none() {
        assert!(pfs_design_from_filesystem("/nonexistent/path", 1).is_none());
    }

    #[test]
    fn cam_id_used_for_sps_camera_id_matches_convention() {
        let outcome = ReadOutcome {
            cam: CameraId::new(Arm::B, 2),
            exptime: 1.0,
            darktime: 1.0,
            time_exp_start: OffsetDateTime::now_utc(),
            time_exp_end: OffsetDateTime::now_utc(),
            beam_config_date: 9998.0,
        };
        assert_eq!(outcome.cam.cam_id(), 5);
    }
}
