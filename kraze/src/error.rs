error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }

    links {
        Core(kraze_core::Error, kraze_core::ErrorKind);
    }

    foreign_links {
        Io(::std::io::Error);
        SerdeY(::serde_yaml::Error);
        SerdeJ(::serde_json::Error);
        Kube(::kube::Error);
    }

    errors {
        ClusterUnavailable(msg: String) {
            description("cannot reach the target cluster")
            display("cluster unavailable: {}", msg)
        }
        ConfigError(msg: String) {
            description("invalid filter or config combination")
            display("config error: {}", msg)
        }
        ProviderError(service: String, msg: String) {
            description("provider operation failed")
            display("{}: {}", service, msg)
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
