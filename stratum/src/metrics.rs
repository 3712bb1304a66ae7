use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::primitives::Primitive;

/// Write each primitive's feature-importance table and out-of-bag error to
/// local files, named by class value: `varImportancePrimitive{c}.csv` and
/// `oobErrorPrimitive{c}.txt`.
pub fn export_metrics(primitives: &[Primitive], dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    for prim in primitives {
        let csv_path = dir.join(format!("varImportancePrimitive{}.csv", prim.class_value));
        let mut writer = csv::Writer::from_path(&csv_path)?;
        writer.write_record(["feature", "importance"])?;

        // highest importance first; name breaks ties so output is stable
        let mut rows: Vec<(&String, &f64)> = prim.importance.iter().collect();
        rows.sort_by(|a, b| b.1.total_cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (feature, importance) in rows {
            let score = importance.to_string();
            writer.write_record([feature.as_str(), score.as_str()])?;
        }
        writer.flush()?;

        let txt_path = dir.join(format!("oobErrorPrimitive{}.txt", prim.class_value));
        std::fs::write(&txt_path, prim.oob_error.to_string())?;
    }

    info!(count = primitives.len(), dir = %dir.display(), "metrics written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use platform::graph::{ImageRef, NodeId};

    fn primitive(class_value: i64) -> Primitive {
        Primitive {
            class_value,
            probability: ImageRef(NodeId::unique()),
            importance: BTreeMap::from([
                ("nir".to_string(), 0.9),
                ("red".to_string(), 0.5),
                ("swir1".to_string(), 0.5),
            ]),
            oob_error: 0.0425,
            schema: vec!["nir".to_string(), "red".to_string(), "swir1".to_string()],
        }
    }

    #[test]
    fn files_are_named_by_class_value() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        export_metrics(&[primitive(1), primitive(6)], dir.path())?;

        for class in [1, 6] {
            assert!(dir
                .path()
                .join(format!("varImportancePrimitive{}.csv", class))
                .exists());
            assert!(dir
                .path()
                .join(format!("oobErrorPrimitive{}.txt", class))
                .exists());
        }
        Ok(())
    }

    #[test]
    fn importance_rows_are_sorted_descending_with_stable_ties() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        export_metrics(&[primitive(2)], dir.path())?;

        let csv = std::fs::read_to_string(dir.path().join("varImportancePrimitive2.csv"))?;
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(
            lines,
            vec!["feature,importance", "nir,0.9", "red,0.5", "swir1,0.5"]
        );
        Ok(())
    }

    #[test]
    fn oob_error_is_plain_numeric_text() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        export_metrics(&[primitive(3)], dir.path())?;

        let text = std::fs::read_to_string(dir.path().join("oobErrorPrimitive3.txt"))?;
        assert_eq!(text, "0.0425");
        assert!(text.parse::<f64>().is_ok());
        Ok(())
    }

    #[test]
    fn missing_directory_is_created() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let nested = dir.path().join("metrics").join("run1");
        export_metrics(&[primitive(4)], &nested)?;
        assert!(nested.join("oobErrorPrimitive4.txt").exists());
        Ok(())
    }
}
