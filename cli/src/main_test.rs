#[cfg(test)]
mod tests {
    use crate::*;

    #[test]
    fn test_sanitize_path_allows_simple_relative() {
        let p = sanitize_path("conf/engine.toml").expect("relative path should be allowed");
        assert_eq!(p, PathBuf::from("conf/engine.toml"));
    }

    #[test]
    fn test_sanitize_path_rejects_parent_dir() {
        let err = sanitize_path("conf/../engine.toml").unwrap_err();
        assert!(err.to_string().contains("Parent directory components"));
    }

    #[cfg(unix)]
    #[test]
    fn test_sanitize_path_allows_absolute_unix() {
        let p = sanitize_path("/tmp/dump").expect("absolute path should be allowed");
        assert_eq!(p, PathBuf::from("/tmp/dump"));
    }

    #[test]
    fn test_cli_args_reject_parent_dir_in_config() {
        let err = CliArgs::try_parse_from(["scopelink", "shared", "--config", "a/../b.toml"]).unwrap_err();
        assert!(err.to_string().contains("Parent directory components"));
    }

    #[test]
    fn test_negative_depth_parses() {
        let args = CliArgs::try_parse_from(["scopelink", "shared", "--depth", "-1"]).expect("should parse");
        match args.command {
            Commands::Shared { depth, .. } => assert_eq!(depth, -1),
            other => panic!("expected shared command, got {other:?}"),
        }
    }

    #[test]
    fn test_depth_from() {
        assert_eq!(depth_from(-1).unwrap(), ScopeDepth::Dynamic);
        assert_eq!(depth_from(3).unwrap(), ScopeDepth::Known(3));
        assert!(depth_from(-2).is_err());
    }

    #[test]
    fn test_env_toggle_enabled() {
        assert!(env_toggle_enabled("1"));
        assert!(env_toggle_enabled("scopelink_core=debug"));
        assert!(!env_toggle_enabled(""));
        assert!(!env_toggle_enabled(" off "));
        assert!(!env_toggle_enabled("FALSE"));
    }

    #[test]
    fn test_filter_expr_from() {
        assert_eq!(filter_expr_from("true"), None);
        assert_eq!(filter_expr_from("  "), None);
        assert_eq!(
            filter_expr_from(" scopelink_core::adapter=trace "),
            Some("scopelink_core::adapter=trace".to_string())
        );
    }

    #[test]
    fn test_optimism_follows_options_and_type() {
        let request = SharedRequest {
            symbol: "n".to_string(),
            sites: 1,
            depth: ScopeDepth::Known(0),
            call: false,
            arity: 0,
            value_type: Type::Int,
            strict: false,
        };
        let mut options = EngineOptions::default();
        assert!(request.shape(&options).is_optimistic());
        options.optimistic_types = false;
        assert!(!request.shape(&options).is_optimistic());

        let object = SharedRequest {
            value_type: Type::Object,
            ..request
        };
        assert!(!object.shape(&EngineOptions::default()).is_optimistic());
    }

    #[test]
    fn test_lower_request_shares_above_threshold() {
        let options = EngineOptions {
            shared_call_threshold: 2,
            ..EngineOptions::default()
        };
        let request = SharedRequest {
            symbol: "f".to_string(),
            sites: 3,
            depth: ScopeDepth::Known(1),
            call: true,
            arity: 2,
            value_type: Type::Object,
            strict: true,
        };
        let (module, lowered) = lower_request(&request, &options).unwrap();
        assert_eq!(lowered.len(), 3);
        let unit = lowered[0].shared.clone().expect("shared unit");
        assert!(module.method(unit.class_name(), unit.method_name()).is_some());

        let below = SharedRequest { sites: 2, ..request };
        let (_, lowered) = lower_request(&below, &options).unwrap();
        assert!(lowered.iter().all(|s| s.shared.is_none()));
    }

    #[test]
    fn test_adapter_request_builds_class_for_concrete_methods() {
        let request = AdapterRequest {
            target: "host.ui.Button".to_string(),
            abstract_methods: vec!["click".to_string()],
            concrete_methods: vec!["label".to_string()],
            overrides: vec![],
            class_level: false,
            denied: vec!["scopelink.internal".to_string()],
            invoke: None,
        };
        let ty = request.host_type();
        assert_eq!(ty.kind(), TypeKind::Class);
        assert!(ty.method("click").unwrap().is_abstract());
        assert!(!ty.method("label").unwrap().is_abstract());
        assert!(matches!(request.overrides(), Overrides::Function(_)));
    }
}
