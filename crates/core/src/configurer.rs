//! Flow configurers and the initializer that runs them.
//!
//! A configurer contributes states and transitions to one or more flow
//! drafts. The initializer is the single entry point that turns the
//! drafts into registered flows.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{error, info};

use crate::builder::{BuilderServices, FlowBuilder};
use crate::error::BuildErrors;
use crate::flow::Flow;
use crate::registry::FlowRegistry;
use crate::validate::validate_subflow_references;

pub const FLOW_ID_LOGIN: &str = "login";
pub const FLOW_ID_LOGOUT: &str = "logout";

/// The flows being assembled in one initialization run, keyed by id.
#[derive(Debug)]
pub struct FlowDrafts {
    services: Arc<BuilderServices>,
    flows: IndexMap<String, FlowBuilder>,
}

impl FlowDrafts {
    pub fn new(services: Arc<BuilderServices>) -> Self {
        FlowDrafts {
            services,
            flows: IndexMap::new(),
        }
    }

    pub fn services(&self) -> &BuilderServices {
        &self.services
    }

    /// The draft for `flow_id`, created empty on first use.
    pub fn flow(&mut self, flow_id: &str) -> &mut FlowBuilder {
        let services = &self.services;
        self.flows
            .entry(flow_id.to_string())
            .or_insert_with(|| FlowBuilder::new(flow_id, Arc::clone(services)))
    }

    pub fn login_flow(&mut self) -> &mut FlowBuilder {
        self.flow(FLOW_ID_LOGIN)
    }

    pub fn logout_flow(&mut self) -> &mut FlowBuilder {
        self.flow(FLOW_ID_LOGOUT)
    }

    pub fn flow_ids(&self) -> Vec<&str> {
        self.flows.keys().map(String::as_str).collect()
    }

    /// Build every draft, collecting the errors of all of them.
    pub fn build_all(&self) -> Result<Vec<Flow>, BuildErrors> {
        let mut errors = BuildErrors::default();
        let mut flows = Vec::with_capacity(self.flows.len());
        for builder in self.flows.values() {
            match builder.build() {
                Ok(flow) => flows.push(flow),
                Err(e) => errors.extend(e),
            }
        }
        errors.into_result(flows)
    }
}

/// Contributes to flow drafts. Configurers run in registration order, so
/// a later configurer can extend states an earlier one created.
pub trait FlowConfigurer: Send + Sync {
    fn name(&self) -> &str;

    fn configure(&self, drafts: &mut FlowDrafts) -> Result<(), BuildErrors>;
}

/// Runs configurers and registers the resulting flows.
pub struct FlowInitializer {
    services: Arc<BuilderServices>,
    configurers: Vec<Box<dyn FlowConfigurer>>,
}

impl FlowInitializer {
    pub fn new(services: BuilderServices) -> Self {
        FlowInitializer {
            services: Arc::new(services),
            configurers: Vec::new(),
        }
    }

    pub fn add_configurer(&mut self, configurer: impl FlowConfigurer + 'static) -> &mut Self {
        self.configurers.push(Box::new(configurer));
        self
    }

    pub fn services(&self) -> &BuilderServices {
        &self.services
    }

    /// Build every flow from scratch and register them.
    ///
    /// Safe to call repeatedly: drafts are fresh on each run and
    /// registering replaces flows with the same id. All configuration
    /// errors are logged and returned; nothing is registered if there
    /// are any.
    pub fn initialize(&self, registry: &FlowRegistry) -> Result<Vec<String>, BuildErrors> {
        let mut drafts = FlowDrafts::new(Arc::clone(&self.services));
        let mut errors = BuildErrors::default();

        for configurer in &self.configurers {
            if let Err(e) = configurer.configure(&mut drafts) {
                error!(configurer = configurer.name(), errors = e.len(), "configurer failed");
                errors.extend(e);
            }
        }

        let flows = match drafts.build_all() {
            Ok(flows) => flows,
            Err(e) => {
                errors.extend(e);
                Vec::new()
            }
        };

        if errors.is_empty() {
            let built: Vec<&str> = flows.iter().map(Flow::id).collect();
            errors.extend(validate_subflow_references(&flows, |id| {
                built.contains(&id) || registry.contains(id)
            }));
        }

        if !errors.is_empty() {
            for e in &errors {
                error!("{}", e);
            }
            return Err(errors);
        }

        let ids: Vec<String> = flows
            .into_iter()
            .map(|flow| registry.register(flow).id().to_string())
            .collect();
        info!(flows = ?ids, "flows initialized");
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{action_fn, ActionRegistry, Event};
    use crate::error::ConfigError;
    use crate::view::TemplateViewFactory;

    struct LoginConfigurer;

    impl FlowConfigurer for LoginConfigurer {
        fn name(&self) -> &str {
            "login"
        }

        fn configure(&self, drafts: &mut FlowDrafts) -> Result<(), BuildErrors> {
            let flow = drafts.login_flow();
            let check = flow.services().resolve_action("noop")?;
            flow.create_action_state("check", vec![check])?;
            flow.add_transition_to_action_state("check", Some("success"), "done")?;
            flow.add_end_state("done", Some("casLoginView"))?;
            flow.set_start_state("check");
            Ok(())
        }
    }

    struct BrokenConfigurer;

    impl FlowConfigurer for BrokenConfigurer {
        fn name(&self) -> &str {
            "broken"
        }

        fn configure(&self, drafts: &mut FlowDrafts) -> Result<(), BuildErrors> {
            let flow = drafts.logout_flow();
            flow.create_subflow_state("delegate", "nowhere", None)?;
            flow.add_default_transition_to_state("delegate", "missing")?;
            flow.set_start_state("delegate");
            Ok(())
        }
    }

    fn services() -> BuilderServices {
        let mut actions = ActionRegistry::new();
        actions.register_instance(action_fn("noop", |_| Ok(Event::success())));
        BuilderServices::new(actions, Arc::new(TemplateViewFactory::permissive()))
    }

    #[test]
    fn initialize_twice_produces_the_same_graph() {
        let registry = FlowRegistry::new();
        let mut init = FlowInitializer::new(services());
        init.add_configurer(LoginConfigurer);

        assert_eq!(init.initialize(&registry).unwrap(), vec!["login".to_string()]);
        let first = registry.get("login").unwrap().summary();
        init.initialize(&registry).unwrap();
        let second = registry.get("login").unwrap().summary();

        assert_eq!(first, second);
        assert_eq!(second.states.len(), 2);
        assert_eq!(registry.flow_ids(), vec!["login".to_string()]);
    }

    #[test]
    fn errors_are_aggregated_and_nothing_is_registered() {
        let registry = FlowRegistry::new();
        let mut init = FlowInitializer::new(services());
        init.add_configurer(LoginConfigurer).add_configurer(BrokenConfigurer);

        let errors = init.initialize(&registry).unwrap_err();
        assert!(errors
            .iter()
            .any(|e| matches!(e, ConfigError::DanglingTarget { target, .. } if target == "missing")));
        assert!(registry.is_empty());
    }

    #[test]
    fn subflow_references_must_resolve() {
        struct Parent;
        impl FlowConfigurer for Parent {
            fn name(&self) -> &str {
                "parent"
            }
            fn configure(&self, drafts: &mut FlowDrafts) -> Result<(), BuildErrors> {
                let flow = drafts.flow("parent");
                flow.create_subflow_state("delegate", "child", None)?;
                flow.add_default_transition_to_state("delegate", "done")?;
                flow.add_end_state("done", None)?;
                flow.set_start_state("delegate");
                Ok(())
            }
        }

        let registry = FlowRegistry::new();
        let mut init = FlowInitializer::new(services());
        init.add_configurer(Parent);
        let errors = init.initialize(&registry).unwrap_err();
        assert!(matches!(
            errors.iter().next(),
            Some(ConfigError::UnknownSubflow { subflow_id, .. }) if subflow_id == "child"
        ));
    }
}
