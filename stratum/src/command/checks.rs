use std::sync::Arc;

use rand::Rng;

use platform::client::PlatformClient;

use stratum::{Error, Result};

/// Default random seed shared by every sampling and splitting step;
/// `--reshuffle` draws a fresh one instead.
pub const DEFAULT_SEED: i64 = 90210;

pub fn resolve_seed(reshuffle: bool) -> i64 {
    if reshuffle {
        let seed: i64 = rand::rng().random_range(1..1_000_000);
        tracing::info!(seed, "reshuffled new seed");
        seed
    } else {
        DEFAULT_SEED
    }
}

/// Syntax check for `YYYY-MM-DD` arguments: exactly 10 characters with
/// literal hyphens at positions 4 and 7. Nothing else is inspected, so a
/// structurally well-formed but impossible date like `2021-13-01` passes;
/// the platform is the semantic authority on dates.
pub fn check_date_format(date: &str) -> Result<()> {
    let bytes = date.as_bytes();
    if bytes.len() == 10 && bytes[4] == b'-' && bytes[7] == b'-' {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "date string doesn't match the required yyyy-mm-dd format: {}",
            date
        )))
    }
}

/// Everything before the final `/` of an asset path.
pub fn parent_folder(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..index],
        None => "",
    }
}

pub async fn ensure_asset_exists(
    client: &Arc<dyn PlatformClient>,
    path: &str,
) -> Result<()> {
    if client.asset_exists(path).await? {
        Ok(())
    } else {
        Err(Error::AssetNotFound(path.to_string()))
    }
}

/// The platform forbids overwriting assets, so destinations must not exist
/// before any job is submitted.
pub async fn ensure_asset_absent(
    client: &Arc<dyn PlatformClient>,
    path: &str,
) -> Result<()> {
    if client.asset_exists(path).await? {
        Err(Error::AssetExists(path.to_string()))
    } else {
        Ok(())
    }
}

/// Export task description: the asset basename, slashes flattened.
pub fn description_from_path(path: &str) -> String {
    let basename = path.rsplit('/').next().unwrap_or(path);
    basename.replace('/', "_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::client::LambdaClient;

    #[test]
    fn well_formed_dates_pass() {
        check_date_format("2021-01-01").unwrap();
        check_date_format("1999-12-31").unwrap();
    }

    #[test]
    fn syntax_check_is_deliberately_permissive() {
        // an impossible month still matches the 10-char hyphen pattern
        check_date_format("2021-13-01").unwrap();
    }

    #[test]
    fn malformed_dates_fail() {
        for date in ["2021/01/01", "2021-1-1", "20210101", "2021-01-011", ""] {
            assert!(
                check_date_format(date).is_err(),
                "{} should be rejected",
                date
            );
        }
    }

    #[test]
    fn parent_folder_strips_basename() {
        assert_eq!(parent_folder("projects/x/assets/output"), "projects/x/assets");
        assert_eq!(parent_folder("bare"), "");
    }

    #[test]
    fn fixed_seed_unless_reshuffled() {
        assert_eq!(resolve_seed(false), 90210);
        let drawn = resolve_seed(true);
        assert!((1..1_000_000i64).contains(&drawn));
    }

    #[tokio::test]
    async fn asset_guards_map_to_the_error_taxonomy() {
        let mut client = LambdaClient::default();
        client.add_asset("projects/x/present");
        let client: Arc<dyn PlatformClient> = Arc::new(client);

        ensure_asset_exists(&client, "projects/x/present").await.unwrap();
        let err = ensure_asset_exists(&client, "projects/x/absent")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AssetNotFound(_)));

        ensure_asset_absent(&client, "projects/x/absent").await.unwrap();
        let err = ensure_asset_absent(&client, "projects/x/present")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AssetExists(_)));
    }

    #[test]
    fn descriptions_flatten_path_basenames() {
        assert_eq!(description_from_path("projects/x/assets/lc_2021"), "lc_2021");
    }
}
