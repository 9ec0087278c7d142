use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{membership_plan, product, MembershipPlan, Product};
use crate::errors::ServiceError;

/// Read-only catalog lookups.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
}

/// Result of resolving a list of product references.
#[derive(Debug, Default)]
pub struct ResolvedProducts {
    /// Found products, in request order
    pub products: Vec<product::Model>,
    /// References that matched nothing public
    pub missing: Vec<String>,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    /// Resolves ids or slugs against publicly visible products only.
    #[instrument(skip(self, refs), fields(requested = refs.len()))]
    pub async fn find_public_by_ids_or_slugs(
        &self,
        refs: &[String],
    ) -> Result<ResolvedProducts, ServiceError> {
        let mut ids = Vec::new();
        let mut slugs = Vec::new();
        for r in refs {
            match Uuid::parse_str(r) {
                Ok(id) => ids.push(id),
                Err(_) => slugs.push(r.to_lowercase()),
            }
        }

        let mut by_ref = Condition::any();
        if !ids.is_empty() {
            by_ref = by_ref.add(product::Column::Id.is_in(ids));
        }
        if !slugs.is_empty() {
            by_ref = by_ref.add(product::Column::Slug.is_in(slugs));
        }

        let found = Product::find()
            .filter(product::Column::IsPublic.eq(true))
            .filter(by_ref)
            .all(&*self.db)
            .await?;

        let mut index: HashMap<String, product::Model> = HashMap::new();
        for p in found {
            index.insert(p.slug.to_lowercase(), p.clone());
            index.insert(p.id.to_string(), p);
        }

        let mut resolved = ResolvedProducts::default();
        let mut taken = std::collections::HashSet::new();
        for r in refs {
            let key = match Uuid::parse_str(r) {
                Ok(id) => id.to_string(),
                Err(_) => r.to_lowercase(),
            };
            match index.get(&key) {
                // an id and a slug naming the same product count once
                Some(p) if taken.insert(p.id) => resolved.products.push(p.clone()),
                Some(_) => {}
                None => resolved.missing.push(r.clone()),
            }
        }

        debug!(
            found = resolved.products.len(),
            missing = resolved.missing.len(),
            "resolved product references"
        );
        Ok(resolved)
    }

    /// Active membership plan by key.
    pub async fn find_active_plan(
        &self,
        key: &str,
    ) -> Result<membership_plan::Model, ServiceError> {
        MembershipPlan::find_by_id(key.to_string())
            .filter(membership_plan::Column::IsActive.eq(true))
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Membership plan {} not found", key)))
    }
}
