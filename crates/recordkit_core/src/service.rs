//! Service trait adapter for configurations.
//!
//! Closures are the primary way to fill a [`ConfigurationBuilder`]. A type
//! that already talks to a backend can implement [`CrudService`] instead and
//! be plugged in as a whole.

use crate::config::{Configuration, ConfigurationBuilder};
use crate::error::{ConfigResult, ServiceError, ServiceResult};
use std::future::Future;
use std::sync::Arc;

/// Which [`CrudService`] methods a service actually supports.
///
/// Unsupported methods leave the matching configuration slot empty, which
/// turns the corresponding `allow_*` flag off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `get_all` is supported.
    pub get_all: bool,
    /// `get_all_where` is supported.
    pub get_all_where: bool,
    /// `create` is supported.
    pub create: bool,
    /// `read` is supported.
    pub read: bool,
    /// `update` is supported.
    pub update: bool,
    /// `delete` is supported.
    pub delete: bool,
}

impl Capabilities {
    /// Everything supported.
    pub const ALL: Self = Self {
        get_all: true,
        get_all_where: true,
        create: true,
        read: true,
        update: true,
        delete: true,
    };

    /// Bulk reads only.
    pub const READ_ONLY: Self = Self {
        get_all: true,
        get_all_where: true,
        create: false,
        read: true,
        update: false,
        delete: false,
    };
}

/// A backend offering the six CRUD calls for model type `M`.
///
/// Every method has a default body that fails with
/// [`ServiceError::Unsupported`]; implement the ones listed in
/// [`capabilities`](Self::capabilities).
pub trait CrudService<M>: Send + Sync + 'static {
    /// Declares the supported methods.
    fn capabilities(&self) -> Capabilities;

    /// Fetches every entity.
    fn get_all(&self) -> impl Future<Output = ServiceResult<Vec<M>>> + Send {
        async { Err(ServiceError::Unsupported("get_all")) }
    }

    /// Fetches the entities matching a server-side filter.
    fn get_all_where(
        &self,
        filter: Option<String>,
    ) -> impl Future<Output = ServiceResult<Vec<M>>> + Send {
        let _ = filter;
        async { Err(ServiceError::Unsupported("get_all_where")) }
    }

    /// Persists a new entity and returns the stored version.
    fn create(&self, model: M) -> impl Future<Output = ServiceResult<M>> + Send {
        let _ = model;
        async { Err(ServiceError::Unsupported("create")) }
    }

    /// Reloads an entity.
    fn read(&self, model: M) -> impl Future<Output = ServiceResult<M>> + Send {
        let _ = model;
        async { Err(ServiceError::Unsupported("read")) }
    }

    /// Persists changes and returns the stored version.
    fn update(&self, model: M) -> impl Future<Output = ServiceResult<M>> + Send {
        let _ = model;
        async { Err(ServiceError::Unsupported("update")) }
    }

    /// Deletes an entity. `Some(false)` content means nothing was deleted.
    fn delete(&self, model: M) -> impl Future<Output = ServiceResult<bool>> + Send {
        let _ = model;
        async { Err(ServiceError::Unsupported("delete")) }
    }
}

impl<M: Send + 'static> ConfigurationBuilder<M> {
    /// Fills the slots `service` declares as supported.
    #[must_use]
    pub fn with_service<S: CrudService<M>>(self, service: Arc<S>) -> Self {
        let caps = service.capabilities();
        let mut builder = self;

        if caps.get_all {
            let s = Arc::clone(&service);
            builder = builder.with_get_all(move || {
                let s = Arc::clone(&s);
                async move { s.get_all().await }
            });
        }
        if caps.get_all_where {
            let s = Arc::clone(&service);
            builder = builder.with_get_all_where(move |filter| {
                let s = Arc::clone(&s);
                async move { s.get_all_where(filter).await }
            });
        }
        if caps.create {
            let s = Arc::clone(&service);
            builder = builder.with_create(move |model| {
                let s = Arc::clone(&s);
                async move { s.create(model).await }
            });
        }
        if caps.read {
            let s = Arc::clone(&service);
            builder = builder.with_read(move |model| {
                let s = Arc::clone(&s);
                async move { s.read(model).await }
            });
        }
        if caps.update {
            let s = Arc::clone(&service);
            builder = builder.with_update(move |model| {
                let s = Arc::clone(&s);
                async move { s.update(model).await }
            });
        }
        if caps.delete {
            builder = builder.with_delete(move |model| {
                let s = Arc::clone(&service);
                async move { s.delete(model).await }
            });
        }
        builder
    }
}

impl<M: Default + Send + 'static> Configuration<M> {
    /// Builds a configuration straight from a service, with default policy.
    ///
    /// # Errors
    ///
    /// Fails if the declared capabilities break a configuration invariant,
    /// for example `create` without `update`.
    pub fn from_service<S: CrudService<M>>(service: Arc<S>) -> ConfigResult<Self> {
        ConfigurationBuilder::new().with_service(service).build()
    }
}
