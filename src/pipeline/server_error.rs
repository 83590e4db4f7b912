// self
use crate::{
	_prelude::*,
	error::{PropertyError, ServerError, TransportError},
	http::PipelineResponse,
	oauth::http::StatusCode,
	pipeline::{CallContext, Next, PipelineFuture, PipelineRequest, Stage},
	transport::Transport,
};

/// Decodes every non-2xx, non-404 response into [`ServerError`].
///
/// 404s are left alone so lenient callers can treat them as "absent".
#[derive(Clone, Copy, Debug, Default)]
pub struct UnmarshalServerError;
impl Stage for UnmarshalServerError {
	fn name(&self) -> &'static str {
		"unmarshal_server_error"
	}

	fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		request: PipelineRequest,
		next: Next<'a>,
	) -> PipelineFuture<'a> {
		Box::pin(async move {
			let response = next.run(ctx, transport, request).await?;

			if response.is_success() || response.status() == StatusCode::NOT_FOUND {
				return Ok(response);
			}

			Err(decode_server_error(&response).await?.into())
		})
	}
}

/// Decodes an error response, trying the single-message shape, then the validation shape.
///
/// Bodies matching neither shape are kept verbatim in [`ServerError::Undetermined`].
pub async fn decode_server_error(response: &PipelineResponse) -> Result<ServerError, TransportError> {
	let status = response.status().as_u16();
	let body = response.body().await?;

	if let Ok(generic) = serde_json::from_slice::<GenericShape>(&body) {
		let code = generic.error_code.map(ErrorCode::into_string).unwrap_or_else(|| status.to_string());

		return Ok(ServerError::Generic { status, code, message: generic.error_message });
	}
	if let Ok(ValidationShape { errors }) = serde_json::from_slice::<ValidationShape>(&body)
		&& !errors.is_empty()
	{
		return Ok(ServerError::Validation { status, errors });
	}

	Ok(ServerError::Undetermined { status, headers: response.header_pairs(), body: body.to_vec() })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenericShape {
	#[serde(default)]
	error_code: Option<ErrorCode>,
	error_message: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorCode {
	Number(i64),
	Text(String),
}
impl ErrorCode {
	fn into_string(self) -> String {
		match self {
			ErrorCode::Number(code) => code.to_string(),
			ErrorCode::Text(code) => code,
		}
	}
}

#[derive(Deserialize)]
struct ValidationShape {
	errors: Vec<PropertyError>,
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::oauth::http::HeaderMap;

	async fn decode(status: u16, body: &str) -> ServerError {
		let response = PipelineResponse::from_bytes(
			StatusCode::from_u16(status).expect("Status fixture should be valid."),
			HeaderMap::new(),
			body.as_bytes().to_vec(),
		);

		decode_server_error(&response).await.expect("Decoding should not fail.")
	}

	#[tokio::test]
	async fn generic_shape_accepts_numeric_and_textual_codes() {
		let numeric = decode(409, r#"{"errorCode":409,"errorMessage":"Conflict"}"#).await;
		let textual = decode(500, r#"{"errorCode":"ERR_500","errorMessage":"Boom"}"#).await;
		let missing = decode(502, r#"{"errorMessage":"Bad gateway"}"#).await;

		assert!(matches!(numeric, ServerError::Generic { status: 409, ref code, .. } if code == "409"));
		assert!(matches!(textual, ServerError::Generic { ref code, ref message, .. } if code == "ERR_500" && message == "Boom"));
		assert!(matches!(missing, ServerError::Generic { ref code, .. } if code == "502"));
	}

	#[tokio::test]
	async fn validation_shape_is_decoded_second() {
		let err = decode(
			400,
			r#"{"errors":[{"property":"name","message":"is required"},{"property":"qps","message":"too high"}]}"#,
		)
		.await;

		match err {
			ServerError::Validation { status, errors } => {
				assert_eq!(status, 400);
				assert_eq!(errors.len(), 2);
				assert_eq!(errors[1].property, "qps");
			},
			other => panic!("Unexpected decoding: {other:?}."),
		}
	}

	#[tokio::test]
	async fn unknown_payloads_are_kept_verbatim() {
		let html = decode(503, "<html>maintenance</html>").await;
		let empty_errors = decode(400, r#"{"errors":[]}"#).await;

		assert!(matches!(html, ServerError::Undetermined { status: 503, ref body, .. } if body == b"<html>maintenance</html>"));
		assert!(matches!(empty_errors, ServerError::Undetermined { status: 400, .. }));
	}
}
