error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    foreign_links {
        Io(::std::io::Error);
        SerdeY(::serde_yaml::Error);
        SerdeJ(::serde_json::Error);
    }

    errors {
        ConfigError(msg: String) {
            description("invalid filter or config combination")
            display("config error: {}", msg)
        }
        MissingDependency(svc: String, missing: String) {
            description("service depends on an undeclared service")
            display("service '{}' depends on '{}' which is not declared", svc, missing)
        }
        Cycle(path: String) {
            description("dependency cycle detected")
            display("dependency cycle: {}", path)
        }
        IncompatibleVersion(found: u32, max: u32) {
            description("state document version is newer than this build understands")
            display("state version {} is newer than the maximum supported version {}", found, max)
        }
        StateError(msg: String) {
            description("state store error")
            display("state error: {}", msg)
        }
    }
}
