// =============================================================================
// fetchers/viacep.rs - viacep.com.br
// =============================================================================
//
// ViaCEP has one quirk worth knowing: an unknown postal code is not a 404.
// It's a cheerful HTTP 200 carrying `{"erro": true}` (or `"true"`, depending
// on which year you ask). We treat that body as undecodable rather than let
// an empty address win the race.
// =============================================================================

use serde::de::Error as _;

use super::{json_object, Fetcher};
use crate::models::{Backend, ViaCepAddress};

pub const ENDPOINT_TEMPLATE: &str = "{base}/ws/{code}/json/";

pub const DEFAULT_BASE_URL: &str = "https://viacep.com.br";

pub fn fetcher(base_url: impl Into<String>) -> Fetcher<ViaCepAddress> {
    Fetcher::new(Backend::ViaCep, base_url, ENDPOINT_TEMPLATE, decode)
}

pub fn decode(body: &[u8]) -> Result<ViaCepAddress, serde_json::Error> {
    let value = json_object(body)?;

    let not_found = match value.get("erro") {
        Some(serde_json::Value::Bool(flag)) => *flag,
        Some(serde_json::Value::String(flag)) => flag == "true",
        _ => false,
    };
    if not_found {
        return Err(serde_json::Error::custom("postal code not found"));
    }

    serde_json::from_value(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decodes_full_record() {
        let body = r#"{
            "cep": "01153-000",
            "logradouro": "Rua Vitorino Carmilo",
            "complemento": "",
            "unidade": "",
            "bairro": "Barra Funda",
            "localidade": "São Paulo",
            "uf": "SP",
            "estado": "São Paulo",
            "regiao": "Sudeste",
            "ibge": "3550308",
            "gia": "1004",
            "ddd": "11",
            "siafi": "7107"
        }"#;
        let address = decode(body.as_bytes()).unwrap();
        assert_eq!(address.regiao.as_deref(), Some("Sudeste"));
        assert_eq!(address.ibge.as_deref(), Some("3550308"));
        assert_eq!(address.complemento.as_deref(), Some(""));
    }

    #[test]
    fn test_erro_flag_is_rejected() {
        let err = decode(br#"{"erro": true}"#).unwrap_err();
        assert!(err.to_string().contains("postal code not found"));

        assert!(decode(br#"{"erro": "true"}"#).is_err());
    }

    #[test]
    fn test_erro_false_is_fine() {
        assert!(decode(br#"{"erro": false, "cep": "01153-000"}"#).is_ok());
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(decode(b"[]").is_err());
        assert!(decode(br#"["01153-000", "Rua Vitorino Carmilo"]"#).is_err());
        assert!(decode(b"null").is_err());
        assert!(decode(b"").is_err());
    }
}
