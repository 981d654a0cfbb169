//! Per-entity configuration: CRUD function slots and policy flags.

use crate::error::{ConfigError, ConfigResult, ServiceResult};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed, sendable future.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub(crate) type ListFn<M> = Arc<dyn Fn() -> BoxFuture<ServiceResult<Vec<M>>> + Send + Sync>;
pub(crate) type WhereFn<M> =
    Arc<dyn Fn(Option<String>) -> BoxFuture<ServiceResult<Vec<M>>> + Send + Sync>;
pub(crate) type ModelFn<M> = Arc<dyn Fn(M) -> BoxFuture<ServiceResult<M>> + Send + Sync>;
pub(crate) type DeleteFn<M> = Arc<dyn Fn(M) -> BoxFuture<ServiceResult<bool>> + Send + Sync>;
type FilterFn<M> = Arc<dyn Fn(&M) -> bool + Send + Sync>;
type FactoryFn<M> = Arc<dyn Fn() -> M + Send + Sync>;

/// CRUD functions and policy flags bound to one model type.
///
/// Which operations are permitted follows from which functions are present.
/// Construction goes through [`ConfigurationBuilder`], which rejects slot
/// combinations that cannot work:
///
/// - `create` requires `update` (saving a new record reuses the save path)
/// - `update` requires `read` (undo and reload need it)
pub struct Configuration<M> {
    get_all: Option<ListFn<M>>,
    get_all_where: Option<WhereFn<M>>,
    create: Option<ModelFn<M>>,
    read: Option<ModelFn<M>>,
    update: Option<ModelFn<M>>,
    delete: Option<DeleteFn<M>>,
    where_filter: Option<FilterFn<M>>,
    factory: FactoryFn<M>,
    save_changes_automatic: bool,
    add_new_record_automatic: bool,
}

impl<M> Configuration<M> {
    /// True if either bulk read function is present.
    pub fn allow_refresh(&self) -> bool {
        self.get_all.is_some() || self.get_all_where.is_some()
    }

    /// True if new records can be saved.
    pub fn allow_create(&self) -> bool {
        self.create.is_some()
    }

    /// True if a single record can be reloaded.
    pub fn allow_read(&self) -> bool {
        self.read.is_some()
    }

    /// True if changes can be saved.
    pub fn allow_update(&self) -> bool {
        self.update.is_some()
    }

    /// True if records can be deleted.
    pub fn allow_delete(&self) -> bool {
        self.delete.is_some()
    }

    /// Whether a focus change saves other changed records.
    pub fn save_changes_automatic(&self) -> bool {
        self.save_changes_automatic
    }

    /// Whether the recordset keeps one blank new record at the end.
    pub fn add_new_record_automatic(&self) -> bool {
        self.add_new_record_automatic
    }

    /// True if a client-side filter is installed.
    pub fn has_where_filter(&self) -> bool {
        self.where_filter.is_some()
    }

    /// Applies the client-side filter, if any.
    pub(crate) fn retain_matching(&self, models: &mut Vec<M>) {
        if let Some(filter) = &self.where_filter {
            models.retain(|m| filter(m));
        }
    }

    /// Produces the model for a new record.
    pub(crate) fn new_model(&self) -> M {
        (self.factory)()
    }

    pub(crate) fn get_all_fn(&self) -> Option<&ListFn<M>> {
        self.get_all.as_ref()
    }

    pub(crate) fn get_all_where_fn(&self) -> Option<&WhereFn<M>> {
        self.get_all_where.as_ref()
    }

    pub(crate) fn create_fn(&self) -> Option<&ModelFn<M>> {
        self.create.as_ref()
    }

    pub(crate) fn read_fn(&self) -> Option<&ModelFn<M>> {
        self.read.as_ref()
    }

    pub(crate) fn update_fn(&self) -> Option<&ModelFn<M>> {
        self.update.as_ref()
    }

    pub(crate) fn delete_fn(&self) -> Option<&DeleteFn<M>> {
        self.delete.as_ref()
    }
}

impl<M> Clone for Configuration<M> {
    fn clone(&self) -> Self {
        Self {
            get_all: self.get_all.clone(),
            get_all_where: self.get_all_where.clone(),
            create: self.create.clone(),
            read: self.read.clone(),
            update: self.update.clone(),
            delete: self.delete.clone(),
            where_filter: self.where_filter.clone(),
            factory: Arc::clone(&self.factory),
            save_changes_automatic: self.save_changes_automatic,
            add_new_record_automatic: self.add_new_record_automatic,
        }
    }
}

impl<M> fmt::Debug for Configuration<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("allow_refresh", &self.allow_refresh())
            .field("allow_create", &self.allow_create())
            .field("allow_read", &self.allow_read())
            .field("allow_update", &self.allow_update())
            .field("allow_delete", &self.allow_delete())
            .field("where_filter", &self.where_filter.is_some())
            .field("save_changes_automatic", &self.save_changes_automatic)
            .field("add_new_record_automatic", &self.add_new_record_automatic)
            .finish()
    }
}

/// Builder for [`Configuration`].
pub struct ConfigurationBuilder<M> {
    inner: Configuration<M>,
}

impl<M: Default + 'static> ConfigurationBuilder<M> {
    /// Creates a builder whose new records start from `M::default()`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_factory(M::default)
    }
}

impl<M: Default + 'static> Default for ConfigurationBuilder<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: 'static> ConfigurationBuilder<M> {
    /// Creates a builder whose new records are produced by `factory`.
    #[must_use]
    pub fn with_factory<F>(factory: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
    {
        Self {
            inner: Configuration {
                get_all: None,
                get_all_where: None,
                create: None,
                read: None,
                update: None,
                delete: None,
                where_filter: None,
                factory: Arc::new(factory),
                save_changes_automatic: false,
                add_new_record_automatic: false,
            },
        }
    }

    /// Sets the function returning every entity.
    #[must_use]
    pub fn with_get_all<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<Vec<M>>> + Send + 'static,
    {
        self.inner.get_all = Some(Arc::new(move || -> BoxFuture<ServiceResult<Vec<M>>> {
            Box::pin(f())
        }));
        self
    }

    /// Sets the function returning the entities matching a filter text.
    #[must_use]
    pub fn with_get_all_where<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<Vec<M>>> + Send + 'static,
    {
        self.inner.get_all_where = Some(Arc::new(
            move |filter| -> BoxFuture<ServiceResult<Vec<M>>> { Box::pin(f(filter)) },
        ));
        self
    }

    /// Sets the function persisting a new entity.
    #[must_use]
    pub fn with_create<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<M>> + Send + 'static,
    {
        self.inner.create = Some(Arc::new(move |model| -> BoxFuture<ServiceResult<M>> {
            Box::pin(f(model))
        }));
        self
    }

    /// Sets the function reloading one entity.
    #[must_use]
    pub fn with_read<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<M>> + Send + 'static,
    {
        self.inner.read = Some(Arc::new(move |model| -> BoxFuture<ServiceResult<M>> {
            Box::pin(f(model))
        }));
        self
    }

    /// Sets the function persisting changes to an existing entity.
    #[must_use]
    pub fn with_update<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<M>> + Send + 'static,
    {
        self.inner.update = Some(Arc::new(move |model| -> BoxFuture<ServiceResult<M>> {
            Box::pin(f(model))
        }));
        self
    }

    /// Sets the function deleting one entity.
    #[must_use]
    pub fn with_delete<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(M) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult<bool>> + Send + 'static,
    {
        self.inner.delete = Some(Arc::new(move |model| -> BoxFuture<ServiceResult<bool>> {
            Box::pin(f(model))
        }));
        self
    }

    /// Installs a predicate applied client-side after every bulk fetch.
    #[must_use]
    pub fn with_where_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&M) -> bool + Send + Sync + 'static,
    {
        self.inner.where_filter = Some(Arc::new(filter));
        self
    }

    /// Sets whether a focus change saves other changed records.
    #[must_use]
    pub fn save_changes_automatic(mut self, value: bool) -> Self {
        self.inner.save_changes_automatic = value;
        self
    }

    /// Sets whether the recordset keeps one blank new record at the end.
    #[must_use]
    pub fn add_new_record_automatic(mut self, value: bool) -> Self {
        self.inner.add_new_record_automatic = value;
        self
    }

    /// Validates the slot invariants and returns the configuration.
    pub fn build(self) -> ConfigResult<Configuration<M>> {
        let config = self.inner;
        if config.create.is_some() && config.update.is_none() {
            return Err(ConfigError::CreateRequiresUpdate);
        }
        if config.update.is_some() && config.read.is_none() {
            return Err(ConfigError::UpdateRequiresRead);
        }
        Ok(config)
    }
}
