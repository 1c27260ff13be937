use ctf_api::CtfApiError;

pub(crate) fn error_code(error: &CtfApiError) -> String {
    match error {
        CtfApiError::ReadFile { .. } => "CLI_READ_FILE".to_string(),
        CtfApiError::WriteFile { .. } => "CLI_WRITE_FILE".to_string(),
        CtfApiError::ParseConfig { .. } => "CLI_CONFIG_PARSE".to_string(),
        CtfApiError::InvalidConfig { .. } => "CLI_CONFIG_INVALID".to_string(),
        CtfApiError::SourceNotFound { .. } => "CLI_SOURCE_NOT_FOUND".to_string(),
        CtfApiError::SourceEmpty { .. } => "CLI_SOURCE_EMPTY".to_string(),
        CtfApiError::Serialize { .. } => "CLI_SERIALIZE".to_string(),
        CtfApiError::Engine(inner) => inner.code.clone(),
    }
}

pub(crate) fn emit_error(error: CtfApiError) -> i32 {
    log::error!("{}", error);
    println!("RESULT:ERROR");
    println!("ERROR_CODE:{}", error_code(&error));
    println!(
        "ERROR_MSG_JSON:{}",
        serde_json::to_string(&error.to_string())
            .unwrap_or_else(|_| "\"Unknown error\"".to_string())
    );
    1
}
