//! In-memory .proto compilation and dynamic message handling.
//!
//! The caller supplies raw .proto source with every request; nothing is
//! cached between calls. Compilation resolves well-known imports
//! (`google/protobuf/*.proto`) from the bundled copies and rejects any
//! other import, since a single pasted file is all we have.

use prost_reflect::{DescriptorPool, DynamicMessage, MethodDescriptor, ServiceDescriptor};
use protox::file::{ChainFileResolver, File, FileResolver, GoogleFileResolver};
use protox::Compiler;

use super::InvokeError;

/// Name given to the caller's pasted source inside the compiler.
const VIRTUAL_FILE: &str = "request.proto";

struct SourceResolver {
    source: String,
}

impl FileResolver for SourceResolver {
    fn open_file(&self, name: &str) -> Result<File, protox::Error> {
        if name == VIRTUAL_FILE {
            File::from_source(name, &self.source)
        } else {
            Err(protox::Error::file_not_found(name))
        }
    }
}

/// Compile pasted .proto source into a descriptor pool.
pub fn compile(proto_source: &str) -> Result<DescriptorPool, InvokeError> {
    let mut resolver = ChainFileResolver::new();
    resolver.add(GoogleFileResolver::new());
    resolver.add(SourceResolver {
        source: proto_source.to_string(),
    });

    let mut compiler = Compiler::with_file_resolver(resolver);
    compiler.include_imports(true);
    compiler
        .open_file(VIRTUAL_FILE)
        .map_err(|e| InvokeError::Compile(e.to_string()))?;

    DescriptorPool::decode(compiler.encode_file_descriptor_set().as_slice())
        .map_err(|e| InvokeError::Compile(e.to_string()))
}

/// Locate the requested unary method. The service name may be the full
/// protobuf name, the bare service name, or the bare name that the file's
/// package qualifies.
pub fn resolve_method(
    pool: &DescriptorPool,
    service: &str,
    method: &str,
) -> Result<MethodDescriptor, InvokeError> {
    let service_desc = find_service(pool, service)
        .ok_or_else(|| InvokeError::ServiceNotFound(service.to_string()))?;

    let method_desc = service_desc
        .methods()
        .find(|m| m.name() == method)
        .ok_or_else(|| InvokeError::MethodNotFound {
            service: service.to_string(),
            method: method.to_string(),
        })?;

    if method_desc.is_client_streaming() || method_desc.is_server_streaming() {
        return Err(InvokeError::Streaming(method.to_string()));
    }
    Ok(method_desc)
}

fn find_service(pool: &DescriptorPool, service: &str) -> Option<ServiceDescriptor> {
    if let Some(svc) = pool
        .services()
        .find(|s| s.full_name() == service || s.name() == service)
    {
        return Some(svc);
    }
    // Bare name qualified by its file's package.
    pool.services()
        .find(|s| s.full_name().ends_with(&format!(".{service}")))
}

/// Build the request message from caller JSON; an empty body means the
/// method's default (empty) input message.
pub fn build_request(
    method: &MethodDescriptor,
    body: &str,
) -> Result<DynamicMessage, InvokeError> {
    if body.trim().is_empty() {
        return Ok(DynamicMessage::new(method.input()));
    }
    let mut de = serde_json::Deserializer::from_str(body);
    let message = DynamicMessage::deserialize(method.input(), &mut de)
        .map_err(|e| InvokeError::RequestDecode(e.to_string()))?;
    de.end()
        .map_err(|e| InvokeError::RequestDecode(e.to_string()))?;
    Ok(message)
}

/// Render a response message as canonical protobuf JSON.
pub fn response_json(message: &DynamicMessage) -> Result<String, InvokeError> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::new(&mut buf);
    serde::Serialize::serialize(message, &mut ser)
        .map_err(|e| InvokeError::ResponseEncode(e.to_string()))?;
    String::from_utf8(buf).map_err(|e| InvokeError::ResponseEncode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_reflect::{ReflectMessage, Value};

    const GREETER_PROTO: &str = r#"
        syntax = "proto3";
        package demo.v1;

        service Greeter {
            rpc SayHello (HelloRequest) returns (HelloReply);
            rpc StreamHellos (HelloRequest) returns (stream HelloReply);
        }

        message HelloRequest {
            string name = 1;
            int32 count = 2;
        }

        message HelloReply {
            string message = 1;
        }
    "#;

    #[test]
    fn compiles_and_resolves_by_full_name() {
        let pool = compile(GREETER_PROTO).unwrap();
        let method = resolve_method(&pool, "demo.v1.Greeter", "SayHello").unwrap();
        assert_eq!(method.input().full_name(), "demo.v1.HelloRequest");
    }

    #[test]
    fn resolves_bare_service_name() {
        let pool = compile(GREETER_PROTO).unwrap();
        let method = resolve_method(&pool, "Greeter", "SayHello").unwrap();
        assert_eq!(method.full_name(), "demo.v1.Greeter.SayHello");
    }

    #[test]
    fn unknown_service_and_method_are_reported() {
        let pool = compile(GREETER_PROTO).unwrap();
        assert!(matches!(
            resolve_method(&pool, "Nope", "SayHello"),
            Err(InvokeError::ServiceNotFound(_))
        ));
        assert!(matches!(
            resolve_method(&pool, "Greeter", "Nope"),
            Err(InvokeError::MethodNotFound { .. })
        ));
    }

    #[test]
    fn streaming_methods_are_rejected() {
        let pool = compile(GREETER_PROTO).unwrap();
        assert!(matches!(
            resolve_method(&pool, "Greeter", "StreamHellos"),
            Err(InvokeError::Streaming(_))
        ));
    }

    #[test]
    fn invalid_proto_source_fails_compilation() {
        assert!(matches!(
            compile("this is not proto"),
            Err(InvokeError::Compile(_))
        ));
    }

    #[test]
    fn builds_request_from_json() {
        let pool = compile(GREETER_PROTO).unwrap();
        let method = resolve_method(&pool, "Greeter", "SayHello").unwrap();

        let msg = build_request(&method, r#"{"name":"world","count":3}"#).unwrap();
        assert_eq!(
            msg.get_field_by_name("name").as_deref(),
            Some(&Value::String("world".into()))
        );
        assert_eq!(
            msg.get_field_by_name("count").as_deref(),
            Some(&Value::I32(3))
        );
    }

    #[test]
    fn empty_body_builds_default_message() {
        let pool = compile(GREETER_PROTO).unwrap();
        let method = resolve_method(&pool, "Greeter", "SayHello").unwrap();
        let msg = build_request(&method, "  ").unwrap();
        assert_eq!(msg.descriptor().full_name(), "demo.v1.HelloRequest");
    }

    #[test]
    fn bad_request_json_is_an_input_error() {
        let pool = compile(GREETER_PROTO).unwrap();
        let method = resolve_method(&pool, "Greeter", "SayHello").unwrap();
        assert!(matches!(
            build_request(&method, r#"{"name": 42}"#),
            Err(InvokeError::RequestDecode(_))
        ));
    }

    #[test]
    fn response_serializes_to_protobuf_json() {
        let pool = compile(GREETER_PROTO).unwrap();
        let method = resolve_method(&pool, "Greeter", "SayHello").unwrap();

        let mut msg = DynamicMessage::new(method.output());
        msg.set_field_by_name("message", Value::String("hi".into()));

        let json = response_json(&msg).unwrap();
        assert_eq!(json, r#"{"message":"hi"}"#);
    }
}
