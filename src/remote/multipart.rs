use rand::RngCore;

#[derive(Clone, Debug)]
struct Part {
    name: String,
    file_name: Option<String>,
    content_type: String,
    data: Vec<u8>,
}

/// `multipart/form-data` body builder for collector uploads.
#[derive(Clone, Debug)]
pub struct MultipartForm {
    boundary: String,
    parts: Vec<Part>,
}

impl MultipartForm {
    pub fn new() -> Self {
        let mut bytes = [0u8; 12];
        rand::thread_rng().fill_bytes(&mut bytes);
        let suffix: String = bytes.iter().map(|b| format!("{:02x}", b)).collect();
        Self::with_boundary(&format!("----EdgeAgentBoundary{}", suffix))
    }

    pub fn with_boundary(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_string(),
            parts: Vec::new(),
        }
    }

    /// Adds a text field (e.g. the `meta` JSON document).
    pub fn text(mut self, name: &str, content_type: &str, value: &str) -> Self {
        self.parts.push(Part {
            name: name.to_string(),
            file_name: None,
            content_type: content_type.to_string(),
            data: value.as_bytes().to_vec(),
        });
        self
    }

    /// Adds a binary file field.
    pub fn file(mut self, name: &str, file_name: &str, content_type: &str, data: Vec<u8>) -> Self {
        self.parts.push(Part {
            name: name.to_string(),
            file_name: Some(file_name.to_string()),
            content_type: content_type.to_string(),
            data,
        });
        self
    }

    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn part_names(&self) -> Vec<&str> {
        self.parts.iter().map(|p| p.name.as_str()).collect()
    }

    /// Raw bytes of a named part, if present.
    pub fn part(&self, name: &str) -> Option<&[u8]> {
        self.parts
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.data.as_slice())
    }

    pub fn body(&self) -> Vec<u8> {
        let mut body = Vec::new();
        for part in &self.parts {
            body.extend_from_slice(format!("--{}\r\n", self.boundary).as_bytes());
            match &part.file_name {
                Some(file_name) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                        part.name, file_name
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n", part.name)
                        .as_bytes(),
                ),
            }
            body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", part.content_type).as_bytes());
            body.extend_from_slice(&part.data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        body
    }
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_layout_matches_form_data() {
        let form = MultipartForm::with_boundary("XYZ")
            .text("meta", "application/json", r#"{"count":1}"#)
            .file("frame_raw", "raw.jpg", "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xD9]);

        let body = form.body();
        let text = String::from_utf8_lossy(&body);
        assert!(text.starts_with("--XYZ\r\nContent-Disposition: form-data; name=\"meta\"\r\n"));
        assert!(text.contains("Content-Type: application/json\r\n\r\n{\"count\":1}\r\n"));
        assert!(text.contains("name=\"frame_raw\"; filename=\"raw.jpg\"\r\nContent-Type: image/jpeg"));
        assert!(text.ends_with("\r\n--XYZ--\r\n"));
        assert_eq!(form.content_type(), "multipart/form-data; boundary=XYZ");
        assert_eq!(form.part_names(), vec!["meta", "frame_raw"]);
    }

    #[test]
    fn generated_boundaries_differ() {
        assert_ne!(MultipartForm::new().content_type(), MultipartForm::new().content_type());
    }
}
