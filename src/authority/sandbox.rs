//! Simulated authority for the FACTUS sandbox environment.
//!
//! Implements the full [`AuthorityClient`] trait with zero network I/O,
//! returning responses that are structurally indistinguishable from live
//! ones (same field sets, only the `sandbox`/`warning` markers added) so
//! the orchestrator, REST surface and test suite exercise the complete
//! lifecycle without live credentials.

use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use tracing::debug;

use crate::config::FactusConfig;
use crate::invoice::{CompanyProfile, Invoice};

use super::wire;
use super::{
    Artifact, AuthorityClient, Cancellation, ConfigCheck, RemoteStatus, Result, Submission,
    Validation,
};

/// Marker string attached to every simulated response.
pub const SIMULATION_WARNING: &str =
    "Respuesta simulada: ambiente sandbox, sin efectos legales";

/// Simulated FACTUS client.
pub struct SandboxAuthorityClient {
    config: FactusConfig,
}

impl SandboxAuthorityClient {
    pub fn new(config: FactusConfig) -> Self {
        Self { config }
    }

    /// Pseudo-unique document id: prefixed, time + random based.
    fn fresh_factus_id() -> String {
        let millis = Utc::now().timestamp_millis();
        let suffix: u32 = rand::rng().random_range(0x1000..0xFFFF);
        format!("SETP-{millis}-{suffix:04x}")
    }

    /// Synthetic CUFE: 96 hex characters, like the real fiscal code.
    fn fresh_cufe() -> String {
        let mut rng = rand::rng();
        (0..96)
            .map(|_| char::from_digit(rng.random_range(0..16), 16).unwrap_or('0'))
            .collect()
    }

    fn qr_for(cufe: &str) -> String {
        format!("https://catalogo-vpfe-hab.dian.gov.co/document/searchqr?documentkey={cufe}")
    }
}

#[async_trait]
impl AuthorityClient for SandboxAuthorityClient {
    async fn submit_invoice(
        &self,
        invoice: &Invoice,
        company: &CompanyProfile,
    ) -> Result<Submission> {
        // The mapping still runs: a structurally broken invoice must fail in
        // sandbox exactly as it would in production.
        let payload = wire::build_bill_payload(invoice, company)?;

        let factus_id = Self::fresh_factus_id();
        let cufe = Self::fresh_cufe();
        debug!(invoice_id = %invoice.id, factus_id = %factus_id, "sandbox submit fabricated");

        Ok(Submission {
            factus_id,
            number: payload.invoice.number,
            status: "created".to_string(),
            raw: serde_json::json!({
                "cufe": cufe,
                "pdf_url": null,
                "xml_url": null,
            }),
            warning: Some(SIMULATION_WARNING.to_string()),
        })
    }

    async fn validate_invoice(&self, factus_id: &str) -> Result<Validation> {
        let cufe = Self::fresh_cufe();
        let qr_code = Self::qr_for(&cufe);
        debug!(factus_id, "sandbox validate fabricated");

        Ok(Validation {
            status: "validated".to_string(),
            cufe: Some(cufe.clone()),
            qr_code: Some(qr_code.clone()),
            result: serde_json::json!({
                "cufe": cufe,
                "qr_code": qr_code,
                "validated_at": Utc::now().to_rfc3339(),
            }),
            warning: Some(SIMULATION_WARNING.to_string()),
        })
    }

    async fn invoice_status(&self, factus_id: &str) -> Result<RemoteStatus> {
        Ok(RemoteStatus {
            status: "created".to_string(),
            cufe: None,
            pdf_url: Some(format!(
                "{}/v1/bills/download-pdf/{factus_id}",
                self.config.base_url
            )),
            xml_url: Some(format!(
                "{}/v1/bills/download-xml/{factus_id}",
                self.config.base_url
            )),
        })
    }

    async fn download_pdf(&self, factus_id: &str) -> Result<Artifact> {
        Ok(Artifact {
            bytes: render_pdf(factus_id).into(),
            content_type: "application/pdf".to_string(),
            sandbox: true,
        })
    }

    async fn download_xml(&self, factus_id: &str) -> Result<Artifact> {
        let xml = format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <Invoice xmlns=\"urn:oasis:names:specification:ubl:schema:xsd:Invoice-2\">\n\
               <ID>{factus_id}</ID>\n\
               <IssueDate>{}</IssueDate>\n\
               <Note>DOCUMENTO SIMULADO - AMBIENTE SANDBOX</Note>\n\
             </Invoice>\n",
            Utc::now().format("%Y-%m-%d"),
        );

        Ok(Artifact {
            bytes: xml.into_bytes().into(),
            content_type: "application/xml".to_string(),
            sandbox: true,
        })
    }

    async fn cancel_invoice(&self, factus_id: &str, _reason: &str) -> Result<Cancellation> {
        debug!(factus_id, "sandbox cancel fabricated");
        Ok(Cancellation {
            cancellation_id: format!("ANU-{}", uuid::Uuid::new_v4()),
            status: "cancelled".to_string(),
        })
    }

    async fn numbering_ranges(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!([{
            "id": 8,
            "document": "01",
            "prefix": "SETP",
            "from": 990000000,
            "to": 995000000,
            "resolution_number": "18760000001",
        }]))
    }

    async fn municipios(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!([
            { "id": 1, "code": "11001", "name": "Bogotá, D.C." },
            { "id": 2, "code": "05001", "name": "Medellín" },
            { "id": 3, "code": "76001", "name": "Cali" },
        ]))
    }

    async fn paises(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!([
            { "code": "CO", "name": "Colombia" },
            { "code": "EC", "name": "Ecuador" },
            { "code": "PA", "name": "Panamá" },
        ]))
    }

    async fn tributos(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!([
            { "id": 1, "code": "01", "name": "IVA" },
            { "id": 2, "code": "04", "name": "INC" },
        ]))
    }

    async fn unidades_medida(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!([
            { "id": 70, "code": "94", "name": "Unidad" },
            { "id": 414, "code": "KGM", "name": "Kilogramo" },
        ]))
    }

    async fn validate_configuration(&self) -> Result<ConfigCheck> {
        Ok(ConfigCheck {
            authenticated: true,
            ranges_available: true,
            sandbox: true,
        })
    }
}

/// Render the simulated invoice PDF: header, issuer and customer blocks, a
/// line-item table, totals, the sandbox disclaimer and a synthetic QR
/// string, assembled as a genuine one-page PDF document.
fn render_pdf(factus_id: &str) -> Vec<u8> {
    let cufe = SandboxAuthorityClient::fresh_cufe();
    let lines = [
        "FACTURA ELECTRONICA DE VENTA".to_string(),
        format!("Documento: {factus_id}"),
        format!("Fecha: {}", Utc::now().format("%Y-%m-%d %H:%M")),
        String::new(),
        "EMISOR".to_string(),
        "  Razon social: (ambiente de pruebas)".to_string(),
        "  NIT: 000000000-0".to_string(),
        String::new(),
        "ADQUIRIENTE".to_string(),
        "  Nombre: (ambiente de pruebas)".to_string(),
        String::new(),
        "DETALLE".to_string(),
        "  Cant  Descripcion                 Total".to_string(),
        "  ----  -----------                 -----".to_string(),
        "   1    Documento de prueba          0.00".to_string(),
        String::new(),
        "TOTALES".to_string(),
        "  Subtotal:  0.00   IVA:  0.00   Total:  0.00".to_string(),
        String::new(),
        "*** DOCUMENTO SIMULADO - AMBIENTE SANDBOX ***".to_string(),
        "Sin validez legal ante la DIAN".to_string(),
        String::new(),
        format!("QR: {}", SandboxAuthorityClient::qr_for(&cufe)),
    ];
    build_pdf(&lines)
}

/// Assemble a single-page PDF from text lines. Written by hand: the pack
/// carries no PDF crate, and the sandbox only needs a well-formed document
/// with visible text.
fn build_pdf(lines: &[String]) -> Vec<u8> {
    fn escape(text: &str) -> String {
        text.replace('\\', "\\\\")
            .replace('(', "\\(")
            .replace(')', "\\)")
    }

    let mut content = String::from("BT\n/F1 9 Tf\n12 TL\n50 770 Td\n");
    for line in lines {
        content.push_str(&format!("({}) Tj\nT*\n", escape(line)));
    }
    content.push_str("ET\n");

    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] \
         /Resources << /Font << /F1 4 0 R >> >> /Contents 5 0 R >>"
            .to_string(),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Courier >>".to_string(),
        format!(
            "<< /Length {} >>\nstream\n{}endstream",
            content.len(),
            content
        ),
    ];

    let mut pdf = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(pdf.len());
        pdf.push_str(&format!("{} 0 obj\n{}\nendobj\n", i + 1, body));
    }

    let xref_offset = pdf.len();
    pdf.push_str(&format!("xref\n0 {}\n", objects.len() + 1));
    pdf.push_str("0000000000 65535 f \n");
    for offset in offsets {
        pdf.push_str(&format!("{offset:010} 00000 n \n"));
    }
    pdf.push_str(&format!(
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    ));

    pdf.into_bytes()
}
