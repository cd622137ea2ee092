//! Loading flow definition files and assembling a flow registry from them.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use portcullis_core::{
    ActionRegistry, BuildErrors, BuilderServices, DefinitionConfigurer, FlowDefinition,
    FlowInitializer, FlowRegistry,
};
use portcullis_support::{
    AcceptUsersHandler, AuthenticationManager, NonInteractiveCredentialsAction,
    PrincipalBearingHandler, RemoteUserPrincipalExtractor, RequestHeaderPrincipalExtractor,
    SpnegoAuthenticationHandler, SpnegoCredentialsExtractor, UsernamePasswordFormExtractor,
};

use crate::settings::{Settings, SettingsError};

static FLOW_SCHEMA_STR: &str = include_str!("../../../docs/flow-definition-schema.json");

#[derive(Debug, thiserror::Error)]
pub(crate) enum LoadError {
    #[error("error reading file '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },

    #[error("error parsing JSON in '{}': {source}", .path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("'{}' does not match the flow definition schema", .path.display())]
    Schema { path: PathBuf, errors: Vec<String> },

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Build(#[from] BuildErrors),
}

impl LoadError {
    /// Individual problems, for reports that list them separately.
    pub fn details(&self) -> Vec<String> {
        match self {
            LoadError::Schema { errors, .. } => errors.clone(),
            LoadError::Build(errors) => errors.iter().map(ToString::to_string).collect(),
            _ => Vec::new(),
        }
    }

    /// One-line summary.
    pub fn headline(&self) -> String {
        match self {
            LoadError::Build(errors) => format!("{} configuration error(s)", errors.len()),
            other => other.to_string(),
        }
    }
}

/// A registry built from definition files.
pub(crate) struct Assembly {
    pub registry: Arc<FlowRegistry>,
    pub flow_ids: Vec<String>,
}

pub(crate) fn assemble(files: &[PathBuf], settings: &Settings) -> Result<Assembly, LoadError> {
    let definitions = load_definitions(files)?;
    let services = BuilderServices::new(
        action_registry(settings)?,
        Arc::new(settings.view_factory()),
    );

    let mut initializer = FlowInitializer::new(services);
    initializer.add_configurer(DefinitionConfigurer::new(definitions));

    let registry = FlowRegistry::new();
    let flow_ids = initializer.initialize(&registry)?;
    Ok(Assembly {
        registry: Arc::new(registry),
        flow_ids,
    })
}

/// Read each file, check it against the definition schema, and parse it.
pub(crate) fn load_definitions(files: &[PathBuf]) -> Result<Vec<FlowDefinition>, LoadError> {
    let schema: serde_json::Value = serde_json::from_str(FLOW_SCHEMA_STR).map_err(|e| {
        LoadError::Internal(format!("failed to parse embedded flow schema: {}", e))
    })?;
    let validator = jsonschema::validator_for(&schema)
        .map_err(|e| LoadError::Internal(format!("failed to compile flow schema: {}", e)))?;

    let mut definitions = Vec::with_capacity(files.len());
    for path in files {
        let doc = read_json(path)?;
        let errors: Vec<String> = validator
            .iter_errors(&doc)
            .map(|e| format!("{}", e))
            .collect();
        if !errors.is_empty() {
            return Err(LoadError::Schema {
                path: path.clone(),
                errors,
            });
        }
        let definition: FlowDefinition =
            serde_json::from_value(doc).map_err(|source| LoadError::Json {
                path: path.clone(),
                source,
            })?;
        debug!(path = %path.display(), flow = %definition.id, "loaded flow definition");
        definitions.push(definition);
    }
    Ok(definitions)
}

fn read_json(path: &Path) -> Result<serde_json::Value, LoadError> {
    let source = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&source).map_err(|source| LoadError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// The named credential actions flow definitions may reference.
pub(crate) fn action_registry(settings: &Settings) -> Result<ActionRegistry, SettingsError> {
    let mut manager = AuthenticationManager::new()
        .with_handler(AcceptUsersHandler::new(settings.users.clone()))
        .with_handler(PrincipalBearingHandler)
        .with_handler(SpnegoAuthenticationHandler::new(settings.negotiator()?));
    if let Some(directory) = settings.directory_handler()? {
        manager = manager.with_handler(directory);
    }
    let manager = Arc::new(manager);

    let mut registry = ActionRegistry::new();
    registry.register_instance(Arc::new(NonInteractiveCredentialsAction::new(
        RemoteUserPrincipalExtractor,
        Arc::clone(&manager),
    )));
    registry.register_instance(Arc::new(NonInteractiveCredentialsAction::new(
        RequestHeaderPrincipalExtractor::new(settings.trusted_header()?),
        Arc::clone(&manager),
    )));
    registry.register_instance(Arc::new(NonInteractiveCredentialsAction::new(
        SpnegoCredentialsExtractor::new(settings.spnego.ntlm),
        Arc::clone(&manager),
    )));
    registry.register_instance(Arc::new(NonInteractiveCredentialsAction::new(
        UsernamePasswordFormExtractor,
        manager,
    )));
    Ok(registry)
}
