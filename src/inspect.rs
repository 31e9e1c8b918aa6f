//! Storage inspection
//!
//! Read-only checks of job containers against the licensing records.

use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::licensing::{EntityId, Job, LicensingProvider};
use crate::storage::{ListOptions, ObjectMetadata, ObjectStore, StoreConnector};

const VARTREE_EXTENSION: &str = ".vtr";

#[derive(Clone)]
pub struct StorageInspector {
    licensing: LicensingProvider,
    connector: Arc<dyn StoreConnector>,
}

impl StorageInspector {
    pub fn new(licensing: LicensingProvider, connector: Arc<dyn StoreConnector>) -> Self {
        Self {
            licensing,
            connector,
        }
    }

    /// Names of the `.vtr` objects in the root of a job container, without
    /// the extension. `None` when the job, its customer or its container is
    /// missing.
    pub async fn real_vartree_names(&self, job_id: &str) -> Result<Option<Vec<String>>> {
        let Some(job) = self.licensing.read_job(job_id).await? else {
            return Ok(None);
        };
        let Some(store) = self.job_store(&job).await? else {
            return Ok(None);
        };
        if !store.container_exists(&job.name).await? {
            return Ok(None);
        }

        let mut names = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut options = ListOptions::new().with_delimiter("/");
            if let Some(t) = token.take() {
                options = options.with_continuation_token(t);
            }
            let page = store.list_objects(&job.name, options).await?;
            names.extend(page.objects.iter().filter_map(|o| vartree_name(&o.key)));
            if !page.is_truncated {
                break;
            }
            token = page.continuation_token;
        }
        Ok(Some(names))
    }

    /// Every object in a job container, looked up by customer and job name.
    pub async fn list_job_objects(
        &self,
        customer_name: &str,
        job_name: &str,
    ) -> Result<Vec<ObjectMetadata>> {
        let customer = self
            .licensing
            .read_customers_by_name(customer_name)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                AppError::CustomerNotFound(format!("Customer '{}' does not exist", customer_name))
            })?;

        let store = self.connector.connect(&customer.storage_key).await?;
        if !store.container_exists(job_name).await? {
            return Ok(Vec::new());
        }
        store.list_all_objects(job_name, None).await
    }

    /// Problems with a job record and its container, one line each.
    pub async fn validate_job(&self, job_id: &str) -> Result<Vec<String>> {
        let id = EntityId::parse(job_id)?;
        let mut problems = Vec::new();

        let Some(job) = self.licensing.read_job(id.as_str()).await? else {
            problems.push(format!("Job Id {} is not in the licensing database.", id));
            return Ok(problems);
        };
        let Some(customer_id) = job.customer_id.as_ref() else {
            problems.push(format!(
                "Job Id {} '{}' does not have a parent customer.",
                id, job.name
            ));
            return Ok(problems);
        };
        let Some(customer) = self.licensing.read_customer(customer_id.as_str()).await? else {
            problems.push(format!(
                "Job Id {} '{}' refers to missing customer {}.",
                id, job.name, customer_id
            ));
            return Ok(problems);
        };

        let probe = match self.connector.connect(&customer.storage_key).await {
            Ok(store) => store
                .list_objects(&job.name, ListOptions::new().with_max_keys(1))
                .await
                .map(|_| ()),
            Err(e) => Err(e),
        };
        match probe {
            Ok(_) => {
                tracing::debug!(job = %job.name, customer = %customer.name, "Probed job container");
            }
            Err(e) => problems.push(e.first_line()),
        }
        Ok(problems)
    }

    /// Problems with a customer record and its storage namespace.
    pub async fn validate_customer(&self, customer_id: &str) -> Result<Vec<String>> {
        let id = EntityId::parse(customer_id)?;
        let mut problems = Vec::new();

        let Some(customer) = self.licensing.read_customer(id.as_str()).await? else {
            problems.push(format!("Customer Id {} is not in the licensing database.", id));
            return Ok(problems);
        };

        match self.connector.connect(&customer.storage_key).await {
            Ok(store) => {
                for job in self.customer_jobs(&customer.job_ids).await? {
                    if let Err(e) = store.container_exists(&job.name).await {
                        problems.push(e.first_line());
                        break;
                    }
                }
            }
            Err(e) => problems.push(e.first_line()),
        }
        Ok(problems)
    }

    async fn customer_jobs(&self, ids: &[EntityId]) -> Result<Vec<Job>> {
        let mut jobs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(job) = self.licensing.read_job(id.as_str()).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn job_store(&self, job: &Job) -> Result<Option<Arc<dyn ObjectStore>>> {
        let Some(customer_id) = job.customer_id.as_ref() else {
            return Ok(None);
        };
        let Some(customer) = self.licensing.read_customer(customer_id.as_str()).await? else {
            return Ok(None);
        };
        self.connector.connect(&customer.storage_key).await.map(Some)
    }
}

fn vartree_name(key: &str) -> Option<String> {
    let split = key.len().checked_sub(VARTREE_EXTENSION.len())?;
    let (stem, ext) = (key.get(..split)?, key.get(split..)?);
    (ext.eq_ignore_ascii_case(VARTREE_EXTENSION) && !stem.is_empty()).then(|| stem.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_memory_pool;
    use crate::licensing::Customer;
    use crate::storage::DefaultConnector;
    use chrono::Utc;

    struct Fixture {
        inspector: StorageInspector,
        connector: DefaultConnector,
        customer_id: String,
        job_id: String,
        orphan_id: String,
    }

    async fn fixture(storage_key: &str) -> Fixture {
        let licensing = LicensingProvider::new(create_memory_pool().await.unwrap());
        let customer = licensing
            .update_customer(&Customer {
                name: "acme".into(),
                storage_key: storage_key.into(),
                ..Default::default()
            })
            .await
            .unwrap();
        let job = licensing
            .update_job(&Job {
                name: "demo".into(),
                customer_id: customer.id.clone(),
                ..Default::default()
            })
            .await
            .unwrap();
        let orphan = licensing
            .update_job(&Job {
                name: "stray".into(),
                ..Default::default()
            })
            .await
            .unwrap();

        let connector = DefaultConnector::new("us-east-1");
        Fixture {
            inspector: StorageInspector::new(licensing, Arc::new(connector.clone())),
            connector,
            customer_id: customer.id.unwrap().to_string(),
            job_id: job.id.unwrap().to_string(),
            orphan_id: orphan.id.unwrap().to_string(),
        }
    }

    #[test]
    fn test_vartree_name() {
        assert_eq!(vartree_name("Age.VTR").as_deref(), Some("Age"));
        assert_eq!(vartree_name("region.vtr").as_deref(), Some("region"));
        assert_eq!(vartree_name(".vtr"), None);
        assert_eq!(vartree_name("age.dat"), None);
        assert_eq!(vartree_name("vt"), None);
    }

    #[tokio::test]
    async fn test_real_vartree_names() {
        let f = fixture("memory:").await;
        assert_eq!(f.inspector.real_vartree_names(&f.job_id).await.unwrap(), None);

        let memory = f.connector.memory_store();
        let now = Utc::now();
        for key in ["age.vtr", "Region.VTR", "notes.txt", "CaseData/deep.vtr"] {
            memory.insert_object("demo", key, vec![1], now).await;
        }

        let mut names = f
            .inspector
            .real_vartree_names(&f.job_id)
            .await
            .unwrap()
            .unwrap();
        names.sort();
        assert_eq!(names, vec!["Region", "age"]);

        assert_eq!(f.inspector.real_vartree_names(&f.orphan_id).await.unwrap(), None);
        assert_eq!(f.inspector.real_vartree_names("29999999").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_job_objects() {
        let f = fixture("memory:").await;
        f.connector
            .memory_store()
            .insert_object("demo", "CaseData/a.dat", vec![0; 12], Utc::now())
            .await;

        let objects = f.inspector.list_job_objects("acme", "demo").await.unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].size, 12);
        assert!(f.inspector.list_job_objects("acme", "none").await.unwrap().is_empty());

        let err = f.inspector.list_job_objects("nobody", "demo").await.unwrap_err();
        assert!(matches!(err, AppError::CustomerNotFound(_)));
    }

    #[tokio::test]
    async fn test_validate_job() {
        let f = fixture("memory:").await;
        let problems = f.inspector.validate_job(&f.job_id).await.unwrap();
        assert_eq!(problems, vec!["Storage error: Container not found: demo".to_string()]);

        f.connector
            .memory_store()
            .insert_object("demo", "age.vtr", vec![1], Utc::now())
            .await;
        assert!(f.inspector.validate_job(&f.job_id).await.unwrap().is_empty());

        let problems = f.inspector.validate_job(&f.orphan_id).await.unwrap();
        assert!(problems[0].contains("does not have a parent customer"));

        let problems = f.inspector.validate_job("29999999").await.unwrap();
        assert!(problems[0].contains("is not in the licensing database"));
    }

    #[tokio::test]
    async fn test_validate_customer() {
        let f = fixture("not a locator").await;
        let problems = f.inspector.validate_customer(&f.customer_id).await.unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("Storage error: Invalid storage locator"));

        let f = fixture("memory:").await;
        assert!(f
            .inspector
            .validate_customer(&f.customer_id)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            f.inspector.validate_customer("x").await,
            Err(AppError::IdentityBadFormat(_))
        ));
    }
}
