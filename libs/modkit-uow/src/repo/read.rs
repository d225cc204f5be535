use async_trait::async_trait;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, EntityTrait, IntoActiveModel, ModelTrait,
    PaginatorTrait, QuerySelect, Related,
};
use tracing::debug;

use super::EntityRepository;
use crate::error::{RepoError, Result};
use crate::fields::{self, FieldMap};
use crate::instance::Instance;
use crate::query::{self, ListQuery};
use crate::session::Session;

/// Read rows through the session's identity map.
///
/// Rows already tracked by the session come back as the same [`Instance`], carrying
/// whatever unflushed changes it holds. With autoflush on, staged writes are flushed
/// before every query.
#[async_trait]
pub trait ReadMixin: EntityRepository
where
    <Self::Entity as EntityTrait>::Model:
        IntoActiveModel<<Self::Entity as EntityTrait>::ActiveModel> + Send + Sync,
    <Self::Entity as EntityTrait>::ActiveModel:
        ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send + Sync,
{
    /// The single row matching every filter.
    ///
    /// # Errors
    /// `NotFound` on zero rows, `MultipleResults` on more than one, `ValidationError`
    /// for unknown fields, `QueryExecution` when the database rejects the query.
    async fn get_one(session: &Session, filters: &FieldMap) -> Result<Instance<Self::Entity>> {
        let entity = fields::entity_name::<Self::Entity>();
        let select = query::select::<Self::Entity>(filters)?;
        let txn = session.reader().await?;
        let mut rows = select
            .limit(2)
            .all(txn)
            .await
            .map_err(|e| RepoError::query(&entity, e))?;
        if rows.len() > 1 {
            return Err(RepoError::MultipleResults { entity });
        }
        let Some(model) = rows.pop() else {
            return Err(RepoError::NotFound { entity });
        };
        Ok(session.identity(model))
    }

    /// Every row matching the filters, possibly none.
    ///
    /// # Errors
    /// `ValidationError` for unknown fields, `QueryExecution` on database failure.
    async fn get_many(
        session: &Session,
        filters: &FieldMap,
    ) -> Result<Vec<Instance<Self::Entity>>> {
        let entity = fields::entity_name::<Self::Entity>();
        let select = query::select::<Self::Entity>(filters)?;
        let txn = session.reader().await?;
        let rows = select
            .all(txn)
            .await
            .map_err(|e| RepoError::query(&entity, e))?;
        debug!(session = session.id(), entity = %entity, rows = rows.len(), "get_many");
        Ok(rows.into_iter().map(|m| session.identity(m)).collect())
    }

    /// First row of `query` in its order, or `None`.
    ///
    /// # Errors
    /// `ValidationError` for unknown filter or order fields and bad pagination,
    /// `QueryExecution` on database failure.
    async fn first(
        session: &Session,
        query: &ListQuery,
    ) -> Result<Option<Instance<Self::Entity>>> {
        let entity = fields::entity_name::<Self::Entity>();
        let select = query::build::<Self::Entity>(query)?;
        let txn = session.reader().await?;
        let row = select
            .one(txn)
            .await
            .map_err(|e| RepoError::query(&entity, e))?;
        Ok(row.map(|m| session.identity(m)))
    }

    /// Filtered, ordered and paginated rows.
    ///
    /// # Errors
    /// `ValidationError` for unknown filter or order fields and `limit == 0`,
    /// `QueryExecution` on database failure.
    async fn list(session: &Session, query: &ListQuery) -> Result<Vec<Instance<Self::Entity>>> {
        let entity = fields::entity_name::<Self::Entity>();
        let select = query::build::<Self::Entity>(query)?;
        let txn = session.reader().await?;
        let rows = select
            .all(txn)
            .await
            .map_err(|e| RepoError::query(&entity, e))?;
        debug!(
            session = session.id(),
            entity = %entity,
            rows = rows.len(),
            skip = ?query.skip,
            limit = ?query.limit,
            "list"
        );
        Ok(rows.into_iter().map(|m| session.identity(m)).collect())
    }

    /// Number of rows matching the filters.
    ///
    /// # Errors
    /// `ValidationError` for unknown fields, `QueryExecution` on database failure.
    async fn count(session: &Session, filters: &FieldMap) -> Result<u64> {
        let entity = fields::entity_name::<Self::Entity>();
        let select = query::select::<Self::Entity>(filters)?;
        let txn = session.reader().await?;
        select
            .count(txn)
            .await
            .map_err(|e| RepoError::query(&entity, e))
    }

    /// Whether any row matches the filters.
    ///
    /// # Errors
    /// `ValidationError` for unknown fields, `QueryExecution` on database failure.
    async fn exists(session: &Session, filters: &FieldMap) -> Result<bool> {
        let entity = fields::entity_name::<Self::Entity>();
        let select = query::select::<Self::Entity>(filters)?;
        let txn = session.reader().await?;
        let row = select
            .one(txn)
            .await
            .map_err(|e| RepoError::query(&entity, e))?;
        Ok(row.is_some())
    }

    /// Rows of `R` related to `obj` through the entity's `Related<R>` declaration.
    ///
    /// A pending `obj` is flushed first so that its key is known.
    ///
    /// # Errors
    /// `NotFound` when `obj` has no row, `QueryExecution` on database failure, flush
    /// errors when flushing `obj` fails.
    async fn related<R>(
        session: &Session,
        obj: &Instance<Self::Entity>,
    ) -> Result<Vec<Instance<R>>>
    where
        Self::Entity: Related<R>,
        R: EntityTrait,
        R::Model: IntoActiveModel<R::ActiveModel> + Send + Sync,
        R::ActiveModel: ActiveModelTrait<Entity = R> + ActiveModelBehavior + Send + Sync,
    {
        let entity = fields::entity_name::<Self::Entity>();
        if obj.model().is_none() {
            session.flush().await?;
        }
        let Some(model) = obj.model() else {
            return Err(RepoError::NotFound { entity });
        };
        let txn = session.reader().await?;
        let rows = model
            .find_related(R::default())
            .all(txn)
            .await
            .map_err(|e| RepoError::query(&fields::entity_name::<R>(), e))?;
        Ok(rows.into_iter().map(|m| session.identity(m)).collect())
    }
}
