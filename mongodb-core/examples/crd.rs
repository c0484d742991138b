//! A script used to generate the CRDs used by this project.
//!
//! Any time a CRD spec changes, this script can be run to ensure that the CRDs are up-to-date and
//! ready to be synced with the cluster.

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use mongodb_core::crd::{MongoDB, MongoDBUser};

fn main() -> Result<()> {
    let canon = std::fs::canonicalize("..").context("error getting canonical path of current dir")?;
    let crds_path = canon.join("k8s").join("crds");
    std::fs::create_dir_all(&crds_path).with_context(|| format!("error creating {:?}", &crds_path))?;

    let mongodb = MongoDB::crd();
    let mongodb_yaml = serde_yaml::to_string(&mongodb).context("error serializing MongoDB CRD to yaml")?;
    std::fs::write(crds_path.join("mongodb.yaml"), &mongodb_yaml).with_context(|| format!("error writing MongoDB CRD to {:?}", &crds_path))?;
    println!("MongoDB CRD written to {:?}", &crds_path);

    let user = MongoDBUser::crd();
    let user_yaml = serde_yaml::to_string(&user).context("error serializing MongoDBUser CRD to yaml")?;
    std::fs::write(crds_path.join("mongodbuser.yaml"), &user_yaml).with_context(|| format!("error writing MongoDBUser CRD to {:?}", &crds_path))?;
    println!("MongoDBUser CRD written to {:?}", &crds_path);

    Ok(())
}
