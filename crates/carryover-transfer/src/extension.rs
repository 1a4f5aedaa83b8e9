//! Service extensions: the entry point a transfer worker uses to obtain
//! importers and authorization flows for one destination service.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use carryover_core::DataType;
use tracing::{info, warn};

use crate::auth::{AuthMode, OAuth2Config, OAuth2DataGenerator, OAuthTokenRefresher};
use crate::config::TransferSettings;
use crate::destination::DestinationClientFactory;
use crate::error::{TransferError, TransferResult};
use crate::importer::Importer;
use crate::importers::{
    CalendarImporter, OrdersImporter, PhotosImporter, TasksImporter, VideosImporter,
};
use crate::store::JobStore;

/// Lifecycle state of an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtensionState {
    Uninitialized,
    Ready,
    /// Initialization failed; importers are unavailable until the next
    /// successful [`TransferExtension::initialize`].
    Failed(String),
}

impl ExtensionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// What an extension needs from its host.
#[derive(Clone)]
pub struct ExtensionContext {
    pub settings: TransferSettings,
    pub job_store: Arc<dyn JobStore>,
}

impl ExtensionContext {
    pub fn new(settings: TransferSettings, job_store: Arc<dyn JobStore>) -> Self {
        Self {
            settings,
            job_store,
        }
    }
}

impl fmt::Debug for ExtensionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Service {
    Pod,
    Neil,
}

impl Service {
    fn id(self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Neil => "neil",
        }
    }

    fn supported_types(self) -> &'static [DataType] {
        match self {
            Self::Pod => &[DataType::Photos, DataType::Calendar, DataType::Tasks],
            Self::Neil => &[DataType::Photos, DataType::Videos, DataType::Order],
        }
    }

    fn oauth_config(self, auth_base_url: &str) -> OAuth2Config {
        match self {
            Self::Pod => OAuth2Config::pod(auth_base_url),
            Self::Neil => OAuth2Config::neil(auth_base_url),
        }
    }
}

/// Everything built by a successful initialization.
struct Initialized {
    importers: HashMap<DataType, Arc<dyn Importer>>,
    oauth_config: OAuth2Config,
    app_credentials: crate::auth::AppCredentials,
    http_client: reqwest::Client,
}

/// One destination service.
pub struct TransferExtension {
    service: Service,
    state: ExtensionState,
    initialized: Option<Initialized>,
}

impl TransferExtension {
    /// The pod service: photos, calendars and tasks.
    #[cfg(feature = "pod")]
    pub fn pod() -> Self {
        Self::for_service(Service::Pod)
    }

    /// The neil service: photos, videos and orders.
    #[cfg(feature = "neil")]
    pub fn neil() -> Self {
        Self::for_service(Service::Neil)
    }

    fn for_service(service: Service) -> Self {
        Self {
            service,
            state: ExtensionState::Uninitialized,
            initialized: None,
        }
    }

    /// Stable id of the service, also its key in [`TransferSettings::providers`].
    pub fn service_id(&self) -> &'static str {
        self.service.id()
    }

    pub fn supported_types(&self) -> &'static [DataType] {
        self.service.supported_types()
    }

    pub fn state(&self) -> &ExtensionState {
        &self.state
    }

    /// Builds the importers from `context`.
    ///
    /// Does nothing if already ready. Configuration problems put the
    /// extension in [`ExtensionState::Failed`] instead of returning an
    /// error.
    pub fn initialize(&mut self, context: &ExtensionContext) -> &ExtensionState {
        if self.state.is_ready() {
            info!(service = self.service_id(), "extension already initialized");
            return &self.state;
        }
        match self.build(context) {
            Ok(initialized) => {
                info!(
                    service = self.service_id(),
                    importers = initialized.importers.len(),
                    "extension initialized"
                );
                self.initialized = Some(initialized);
                self.state = ExtensionState::Ready;
            }
            Err(e) => {
                warn!(service = self.service_id(), error = %e, "extension initialization failed");
                self.initialized = None;
                self.state = ExtensionState::Failed(e.to_string());
            }
        }
        &self.state
    }

    fn build(&self, context: &ExtensionContext) -> TransferResult<Initialized> {
        let settings = &context.settings;
        settings.validate()?;
        let provider = settings.provider(self.service_id())?;
        let app_credentials = provider.app_credentials()?;
        let base_url = provider.base_url()?;
        let oauth_config = self.service.oauth_config(provider.auth_base_url());
        oauth_config.validate()?;

        let http_client = settings.http_client()?;
        let upload_client = settings.upload_client()?;
        let refresher = Arc::new(OAuthTokenRefresher::new(
            http_client.clone(),
            app_credentials.clone(),
        ));
        let clients =
            DestinationClientFactory::new(http_client.clone(), upload_client.clone(), base_url, refresher);

        let mut importers: HashMap<DataType, Arc<dyn Importer>> = HashMap::new();
        for &data_type in self.supported_types() {
            let importer: Arc<dyn Importer> = match data_type {
                DataType::Photos => Arc::new(PhotosImporter::new(
                    clients.clone(),
                    context.job_store.clone(),
                    upload_client.clone(),
                )),
                DataType::Videos => Arc::new(VideosImporter::new(
                    clients.clone(),
                    context.job_store.clone(),
                    upload_client.clone(),
                )),
                DataType::Calendar => Arc::new(CalendarImporter::new(clients.clone())),
                DataType::Tasks => Arc::new(TasksImporter::new(clients.clone())),
                DataType::Order => Arc::new(OrdersImporter::new(clients.clone())),
            };
            importers.insert(data_type, importer);
        }

        Ok(Initialized {
            importers,
            oauth_config,
            app_credentials,
            http_client,
        })
    }

    /// Returns the importer for `data_type`.
    pub fn importer(&self, data_type: DataType) -> TransferResult<Arc<dyn Importer>> {
        let initialized = self.ready()?;
        initialized.importers.get(&data_type).cloned().ok_or_else(|| {
            TransferError::configuration(format!(
                "{} does not support importing {}",
                self.service_id(),
                data_type
            ))
        })
    }

    /// Starts an authorization round trip for `data_type`.
    pub fn auth_data_generator(
        &self,
        data_type: DataType,
        mode: AuthMode,
    ) -> TransferResult<OAuth2DataGenerator> {
        let initialized = self.ready()?;
        if !self.supported_types().contains(&data_type) {
            return Err(TransferError::configuration(format!(
                "{} does not support {}",
                self.service_id(),
                data_type
            )));
        }
        OAuth2DataGenerator::new(
            initialized.oauth_config.clone(),
            initialized.app_credentials.clone(),
            initialized.http_client.clone(),
            data_type,
            mode,
        )
    }

    fn ready(&self) -> TransferResult<&Initialized> {
        match (&self.state, &self.initialized) {
            (ExtensionState::Ready, Some(initialized)) => Ok(initialized),
            (ExtensionState::Failed(reason), _) => Err(TransferError::configuration(format!(
                "{} failed to initialize: {}",
                self.service_id(),
                reason
            ))),
            _ => Err(TransferError::configuration(format!(
                "{} is not initialized",
                self.service_id()
            ))),
        }
    }
}

impl fmt::Debug for TransferExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferExtension")
            .field("service", &self.service)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
