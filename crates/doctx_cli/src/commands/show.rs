//! Show command implementation.

use super::ClusterArgs;

/// Runs the show command.
pub fn run(args: &ClusterArgs, collection: &str, key: &str) -> Result<(), Box<dyn std::error::Error>> {
    let cluster = args.connect()?;
    let result = cluster.bucket(&args.bucket)?.collection(collection).get(key);
    cluster.close()?;

    let doc = result?;
    println!("{}", serde_json::to_string_pretty(doc.content())?);
    println!("cas: {}", doc.cas());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support;
    use doctx_core::CoreError;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn shows_existing_and_reports_missing() {
        let dir = tempdir().unwrap();
        let args = test_support::args(dir.path());
        {
            let cluster = args.connect().unwrap();
            let collection = cluster.bucket("test").unwrap().default_collection();
            collection.insert("acc1", &json!({"name": "Acme"})).unwrap();
            cluster.close().unwrap();
        }

        run(&args, doctx_core::DEFAULT_COLLECTION, "acc1").unwrap();

        let err = run(&args, doctx_core::DEFAULT_COLLECTION, "nope").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CoreError>(),
            Some(CoreError::DocumentNotFound { .. })
        ));
    }
}
